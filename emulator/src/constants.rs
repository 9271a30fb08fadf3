pub type Address = u16;

/// Total size of a machine's address space
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Where the entry point (big-endian) is read from when the machine starts
pub const ENTRYPOINT: Address = 0x0000;

/// Depth of the data stack, in octets
pub const STACK_POINTER: Address = 0x0002;

/// Depth of the return stack, in octets
pub const RETURN_STACK_POINTER: Address = 0x0003;

/// Status and fault flags
pub const STATUS: Address = 0x0004;

/// Start of the data stack storage
pub const STACK_START: Address = 0x0100;

/// Start of the return stack storage
pub const RETURN_STACK_START: Address = 0x0200;

/// Maximum depth of both stacks. The depth has to fit in its pointer octet.
pub const STACK_CAPACITY: u8 = 0xFF;

/// High octet of the addresses routed to devices
pub const DEVICE_PAGE: u8 = 0x03;

/// Number of device slots in the device window
pub const DEVICE_SLOTS: usize = 16;

/// Default place to load programs
pub const PROGRAM_START: Address = 0x0400;

/// Machine identifiers go from 0 up to (and including) this one
pub const MAX_MACHINE_ID: u8 = 254;
