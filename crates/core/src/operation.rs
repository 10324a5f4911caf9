//! Bins and record operations
//!
//! An [`Operation`] is one entry of an operate request: read a bin, write a
//! bin, increment, append, touch, delete, or apply a collection (CDT)
//! operation. The wire op codes live on [`OperationType`].

use crate::value::Value;

/// Named value written to a record
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Bin name
    pub name: String,
    /// Bin value
    pub value: Value,
}

impl Bin {
    /// Create a bin
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Bin {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Kind of one record operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Read a bin, or every bin when the name is empty
    Read,
    /// Read generation and expiration only
    ReadHeader,
    /// Overwrite a bin
    Write,
    /// Read from a collection bin
    CdtRead,
    /// Modify a collection bin
    CdtModify,
    /// Integer/float increment
    Add,
    /// String/blob append
    Append,
    /// String/blob prepend
    Prepend,
    /// Reset the record's expiration
    Touch,
    /// Delete the whole record
    Delete,
}

impl OperationType {
    /// Wire op code
    pub fn code(self) -> u8 {
        match self {
            OperationType::Read | OperationType::ReadHeader => 1,
            OperationType::Write => 2,
            OperationType::CdtRead => 3,
            OperationType::CdtModify => 4,
            OperationType::Add => 5,
            OperationType::Append => 9,
            OperationType::Prepend => 10,
            OperationType::Touch => 11,
            OperationType::Delete => 14,
        }
    }

    /// Map a wire op code back to a type
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => OperationType::Read,
            2 => OperationType::Write,
            3 => OperationType::CdtRead,
            4 => OperationType::CdtModify,
            5 => OperationType::Add,
            9 => OperationType::Append,
            10 => OperationType::Prepend,
            11 => OperationType::Touch,
            14 => OperationType::Delete,
            _ => return None,
        })
    }

    /// Whether the operation modifies the record
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            OperationType::Read | OperationType::ReadHeader | OperationType::CdtRead
        )
    }
}

/// One operation within an operate, batch or transaction command
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation kind
    pub op_type: OperationType,
    /// Target bin; empty for record-level operations
    pub bin_name: String,
    /// Argument (write value, increment, or CDT argument list)
    pub value: Value,
}

impl Operation {
    fn new(op_type: OperationType, bin_name: impl Into<String>, value: Value) -> Self {
        Operation {
            op_type,
            bin_name: bin_name.into(),
            value,
        }
    }

    /// Read every bin
    pub fn get() -> Self {
        Operation::new(OperationType::Read, "", Value::Nil)
    }

    /// Read one bin
    pub fn get_bin(name: impl Into<String>) -> Self {
        Operation::new(OperationType::Read, name, Value::Nil)
    }

    /// Read generation and expiration only
    pub fn get_header() -> Self {
        Operation::new(OperationType::ReadHeader, "", Value::Nil)
    }

    /// Write a bin
    pub fn put(bin: Bin) -> Self {
        Operation::new(OperationType::Write, bin.name, bin.value)
    }

    /// Increment a numeric bin
    pub fn add(bin: Bin) -> Self {
        Operation::new(OperationType::Add, bin.name, bin.value)
    }

    /// Append to a string/blob bin
    pub fn append(bin: Bin) -> Self {
        Operation::new(OperationType::Append, bin.name, bin.value)
    }

    /// Prepend to a string/blob bin
    pub fn prepend(bin: Bin) -> Self {
        Operation::new(OperationType::Prepend, bin.name, bin.value)
    }

    /// Reset the record's expiration
    pub fn touch() -> Self {
        Operation::new(OperationType::Touch, "", Value::Nil)
    }

    /// Delete the record
    pub fn delete() -> Self {
        Operation::new(OperationType::Delete, "", Value::Nil)
    }

    /// True for operations that read every bin
    pub fn reads_all_bins(&self) -> bool {
        self.op_type == OperationType::Read && self.bin_name.is_empty()
    }
}

/// List (CDT) operations.
///
/// Arguments are carried as a `Value::List` of `[op_code, args...]` and
/// encoded as msgpack by the wire codec.
pub mod list {
    use super::{Operation, OperationType};
    use crate::value::Value;

    const APPEND: i64 = 1;
    const APPEND_ITEMS: i64 = 2;
    const SIZE: i64 = 16;
    const GET: i64 = 17;

    /// Ordering of a list bin
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ListOrder {
        /// Insertion order
        Unordered = 0,
        /// Sorted by value
        Ordered = 1,
    }

    /// Write flags for list modifications
    pub mod write_flags {
        /// Default behaviour
        pub const DEFAULT: u32 = 0;
        /// Only add values not already present
        pub const ADD_UNIQUE: u32 = 1;
        /// Disallow inserts beyond the list bounds
        pub const INSERT_BOUNDED: u32 = 2;
        /// Do not raise an error when a unique/bounded check fails
        pub const NO_FAIL: u32 = 4;
        /// Apply the items that pass, skip the rest
        pub const PARTIAL: u32 = 8;
    }

    /// Order and write flags applied by a list modification
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListPolicy {
        /// List order
        pub order: ListOrder,
        /// Combination of [`write_flags`]
        pub flags: u32,
    }

    impl ListPolicy {
        /// Create a list policy
        pub fn new(order: ListOrder, flags: u32) -> Self {
            ListPolicy { order, flags }
        }
    }

    impl Default for ListPolicy {
        fn default() -> Self {
            ListPolicy::new(ListOrder::Unordered, write_flags::DEFAULT)
        }
    }

    /// Append one value
    pub fn append(policy: ListPolicy, bin: impl Into<String>, value: impl Into<Value>) -> Operation {
        Operation {
            op_type: OperationType::CdtModify,
            bin_name: bin.into(),
            value: Value::List(vec![
                Value::Int(APPEND),
                value.into(),
                Value::Int(policy.order as i64),
                Value::Int(policy.flags as i64),
            ]),
        }
    }

    /// Append several values
    pub fn append_items(policy: ListPolicy, bin: impl Into<String>, values: Vec<Value>) -> Operation {
        Operation {
            op_type: OperationType::CdtModify,
            bin_name: bin.into(),
            value: Value::List(vec![
                Value::Int(APPEND_ITEMS),
                Value::List(values),
                Value::Int(policy.order as i64),
                Value::Int(policy.flags as i64),
            ]),
        }
    }

    /// Number of items
    pub fn size(bin: impl Into<String>) -> Operation {
        Operation {
            op_type: OperationType::CdtRead,
            bin_name: bin.into(),
            value: Value::List(vec![Value::Int(SIZE)]),
        }
    }

    /// Item at an index (negative counts from the end)
    pub fn get(bin: impl Into<String>, index: i64) -> Operation {
        Operation {
            op_type: OperationType::CdtRead,
            bin_name: bin.into(),
            value: Value::List(vec![Value::Int(GET), Value::Int(index)]),
        }
    }
}
