use crate::runtime::Instruction;

/// One row of a disassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub address: u16,
    pub octets: Vec<u8>,

    /// `None` when the octets do not decode to an instruction
    pub instruction: Option<Instruction>,
}

impl std::fmt::Display for Listing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let octets = self
            .octets
            .iter()
            .map(|octet| format!("{octet:02x}"))
            .collect::<Vec<_>>()
            .join(" ");

        write!(f, "{:04x}  {octets:<8}  ", self.address)?;
        match self.instruction {
            Some(instruction) => write!(f, "{instruction}"),
            None => write!(f, ".byte {:#04x}", self.octets.first().copied().unwrap_or_default()),
        }
    }
}

/// Decode a program image loaded at `origin`.
///
/// Octets that do not start a valid instruction get a row of their own.
#[must_use]
pub fn disassemble(image: &[u8], origin: u16) -> Vec<Listing> {
    let mut listing = Vec::new();
    let mut rest = image;
    let mut address = origin;

    while !rest.is_empty() {
        let (len, instruction) = match Instruction::decode(rest) {
            Ok(instruction) => (instruction.encoded_len(), Some(instruction)),
            Err(_) => (1, None),
        };
        let (octets, tail) = rest.split_at(usize::from(len));

        listing.push(Listing {
            address,
            octets: octets.to_vec(),
            instruction,
        });

        rest = tail;
        address = address.wrapping_add(len);
    }

    listing
}
