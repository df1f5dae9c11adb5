pub mod address;
pub mod clock;
pub mod messaging;
pub mod receiver;
pub mod runtime;
pub mod syscalls;
