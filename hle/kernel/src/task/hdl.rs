/// The type tag every kernel object carries in a handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HandleType {
    Unknown = 0,
    Event = 1,
    Mutex = 2,
    SharedMemory = 3,
    Redirection = 4,
    Thread = 5,
    Process = 6,
    AddressArbiter = 7,
    Semaphore = 8,
    Timer = 9,
    ResourceLimit = 10,
    CodeSet = 11,
    ClientPort = 12,
    ServerPort = 13,
    ClientSession = 14,
    ServerSession = 15,
}

impl Default for HandleType {
    fn default() -> Self {
        HandleType::Unknown
    }
}

/// A kernel object that can be registered in a generic handle table.
pub trait Object: Send {
    fn handle_type(&self) -> HandleType;

    fn type_name(&self) -> &'static str;

    /// The display name of this particular object.
    fn name(&self) -> &str;
}
