//! Wire constants for the subset of JDWP 1.6 this agent speaks.

pub const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";

pub const HEADER_SIZE: usize = 11;
pub const FLAG_REPLY: u8 = 0x80;

pub mod command_set {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const REFERENCE_TYPE: u8 = 2;
    pub const METHOD: u8 = 6;
    pub const OBJECT_REFERENCE: u8 = 9;
    pub const STRING_REFERENCE: u8 = 10;
    pub const THREAD_REFERENCE: u8 = 11;
    pub const ARRAY_REFERENCE: u8 = 13;
    pub const EVENT_REQUEST: u8 = 15;
    pub const STACK_FRAME: u8 = 16;
    pub const CLASS_OBJECT_REFERENCE: u8 = 17;
    pub const EVENT: u8 = 64;
}

pub mod error {
    pub const NONE: u16 = 0;
    pub const INVALID_THREAD: u16 = 10;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const INVALID_METHODID: u16 = 23;
    pub const INVALID_FIELDID: u16 = 25;
    pub const INVALID_FRAMEID: u16 = 30;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const INVALID_SLOT: u16 = 35;
    pub const NOT_IMPLEMENTED: u16 = 99;
    pub const ABSENT_INFORMATION: u16 = 101;
    pub const INVALID_EVENT_TYPE: u16 = 102;
    pub const INVALID_ARRAY: u16 = 508;
    pub const INVALID_LENGTH: u16 = 504;
    pub const INVALID_STRING: u16 = 506;
    pub const INTERNAL: u16 = 113;
    pub const ILLEGAL_ARGUMENT: u16 = 103;
}

pub mod event_kind {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const EXCEPTION: u8 = 4;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const CLASS_UNLOAD: u8 = 9;
    pub const FIELD_ACCESS: u8 = 20;
    pub const FIELD_MODIFICATION: u8 = 21;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const MONITOR_CONTENDED_ENTER: u8 = 43;
    pub const MONITOR_CONTENDED_ENTERED: u8 = 44;
    pub const MONITOR_WAIT: u8 = 45;
    pub const MONITOR_WAITED: u8 = 46;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

pub mod suspend_policy {
    pub const NONE: u8 = 0;
    pub const EVENT_THREAD: u8 = 1;
    pub const ALL: u8 = 2;
}

pub mod type_tag {
    pub const CLASS: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const ARRAY: u8 = 3;
}

/// Value tags ("atag"/"tag" in the protocol).
pub mod tag {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';
}

pub mod class_status {
    pub const VERIFIED: i32 = 1;
    pub const PREPARED: i32 = 2;
    pub const INITIALIZED: i32 = 4;
    pub const ERROR: i32 = 8;
}

pub mod thread_status {
    pub const ZOMBIE: i32 = 0;
    pub const RUNNING: i32 = 1;
    pub const SLEEPING: i32 = 2;
    pub const MONITOR: i32 = 3;
    pub const WAIT: i32 = 4;
}

pub mod step_depth {
    pub const INTO: i32 = 0;
    pub const OVER: i32 = 1;
    pub const OUT: i32 = 2;
}

pub mod step_size {
    pub const MIN: i32 = 0;
    pub const LINE: i32 = 1;
}

pub mod modifier_kind {
    pub const COUNT: u8 = 1;
    pub const CONDITIONAL: u8 = 2;
    pub const THREAD_ONLY: u8 = 3;
    pub const CLASS_ONLY: u8 = 4;
    pub const CLASS_MATCH: u8 = 5;
    pub const CLASS_EXCLUDE: u8 = 6;
    pub const LOCATION_ONLY: u8 = 7;
    pub const EXCEPTION_ONLY: u8 = 8;
    pub const FIELD_ONLY: u8 = 9;
    pub const STEP: u8 = 10;
    pub const INSTANCE_ONLY: u8 = 11;
    pub const SOURCE_NAME_MATCH: u8 = 12;
}

/// `VirtualMachine/IDSizes` reply: object and reference-type ids are map
/// indices, member and frame ids are machine-pointer sized.
pub mod id_sizes {
    pub const FIELD_ID: i32 = 8;
    pub const METHOD_ID: i32 = 8;
    pub const OBJECT_ID: i32 = 4;
    pub const REFERENCE_TYPE_ID: i32 = 4;
    pub const FRAME_ID: i32 = 8;
}
