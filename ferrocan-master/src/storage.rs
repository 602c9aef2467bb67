//! Live object storage
//!
//! Holds the master-side live values for one node's dictionary entries, with typed access, init
//! value application, and delegate mounting for PDO buffer slots. Every entry carries its own
//! mutex; delegates are invoked with the entry lock held and may block briefly (buffer reads
//! wait up to one second for fresh data).

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use ferrocan_common::NodeId;
use snafu::Snafu;

use crate::{
    dictionary::{DictEntry, ObjectDict, ObjectKey, ScalarValue, Value},
    pdo::BufferError,
};

/// Errors accessing object storage
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The dictionary has no entry at this key
    #[snafu(display("No such entry: {key}"))]
    NoSuchEntry {
        /// The requested key
        key: ObjectKey,
    },
    /// The entry exists but holds no live value yet
    #[snafu(display("Entry {key} has no value"))]
    NoValue {
        /// The requested key
        key: ObjectKey,
    },
    /// The requested type does not match the entry's data type
    #[snafu(display("Type mismatch accessing {key}"))]
    TypeMismatch {
        /// The requested key
        key: ObjectKey,
    },
    /// The entry has no fixed byte size and cannot back a PDO slot
    #[snafu(display("Entry {key} cannot be mapped"))]
    Unmappable {
        /// The requested key
        key: ObjectKey,
    },
    /// A mounted buffer rejected the access
    #[snafu(display("Buffer access failed for {key}: {source}"))]
    Buffer {
        /// The accessed key
        key: ObjectKey,
        /// The underlying buffer fault
        source: BufferError,
    },
}

/// Delegate consulted when a mapped entry is read; receives the current encoding and may
/// replace it with fresher bytes
pub type ReadDelegate = Box<dyn Fn(&DictEntry, &mut Vec<u8>) -> Result<(), StorageError> + Send + Sync>;

/// Delegate invoked after a mapped entry is written, with the new encoding
pub type WriteDelegate = Box<dyn Fn(&DictEntry, &[u8]) -> Result<(), StorageError> + Send + Sync>;

/// Callable producing a diagnostic string for one entry
pub type StringReader = Box<dyn Fn() -> Result<String, StorageError> + Send + Sync>;

struct StorageCell {
    entry: DictEntry,
    value: Option<Value>,
    read_delegate: Option<ReadDelegate>,
    write_delegate: Option<WriteDelegate>,
}

impl StorageCell {
    /// Refresh the live value through the read delegate, if one is mounted
    fn refresh(&mut self) -> Result<(), StorageError> {
        let Some(read_delegate) = &self.read_delegate else {
            return Ok(());
        };
        let mut bytes = match &self.value {
            Some(value) => value.raw(),
            None => vec![0; self.entry.byte_size().unwrap_or(0)],
        };
        read_delegate(&self.entry, &mut bytes)?;
        self.value = Some(Value::from_raw(self.entry.data_type, &bytes).ok_or(
            StorageError::TypeMismatch {
                key: self.entry.key,
            },
        )?);
        Ok(())
    }

    fn store(&mut self, value: Value) -> Result<(), StorageError> {
        if value.data_type() != self.entry.data_type {
            return Err(StorageError::TypeMismatch {
                key: self.entry.key,
            });
        }
        let raw = value.raw();
        self.value = Some(value);
        if let Some(write_delegate) = &self.write_delegate {
            write_delegate(&self.entry, &raw)?;
        }
        Ok(())
    }
}

/// Typed accessor bound to one storage entry
pub struct EntryHandle<T> {
    cell: Arc<Mutex<StorageCell>>,
    _marker: PhantomData<T>,
}

impl<T> core::fmt::Debug for EntryHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntryHandle").finish_non_exhaustive()
    }
}

impl<T: ScalarValue> EntryHandle<T> {
    /// Read the value, consulting a mounted read delegate first
    pub fn get(&self) -> Result<T, StorageError> {
        let mut cell = self.cell.lock().unwrap();
        cell.refresh()?;
        let key = cell.entry.key;
        let value = cell.value.as_ref().ok_or(StorageError::NoValue { key })?;
        T::from_value(value).ok_or(StorageError::TypeMismatch { key })
    }

    /// Read the live value without consulting a delegate
    pub fn get_cached(&self) -> Result<T, StorageError> {
        let cell = self.cell.lock().unwrap();
        let key = cell.entry.key;
        let value = cell.value.as_ref().ok_or(StorageError::NoValue { key })?;
        T::from_value(value).ok_or(StorageError::TypeMismatch { key })
    }

    /// Write the value, forwarding through a mounted write delegate
    pub fn set(&self, value: T) -> Result<(), StorageError> {
        self.cell.lock().unwrap().store(value.into_value())
    }

    /// The dictionary entry this handle is bound to
    pub fn dict_entry(&self) -> DictEntry {
        self.cell.lock().unwrap().entry.clone()
    }
}

/// Live typed storage for one node's dictionary
pub struct ObjectStorage {
    node_id: NodeId,
    dict: Arc<ObjectDict>,
    cells: HashMap<ObjectKey, Arc<Mutex<StorageCell>>>,
}

impl core::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("node_id", &self.node_id)
            .field("entries", &self.cells.len())
            .finish()
    }
}

impl ObjectStorage {
    /// Create storage for `dict`; all live values start unset
    pub fn new(dict: Arc<ObjectDict>, node_id: NodeId) -> Self {
        let cells = dict
            .iter()
            .map(|entry| {
                (
                    entry.key,
                    Arc::new(Mutex::new(StorageCell {
                        entry: entry.clone(),
                        value: None,
                        read_delegate: None,
                        write_delegate: None,
                    })),
                )
            })
            .collect();
        Self {
            node_id,
            dict,
            cells,
        }
    }

    /// The node this storage belongs to
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The backing dictionary
    pub fn dict(&self) -> &Arc<ObjectDict> {
        &self.dict
    }

    fn cell(&self, index: u16, sub: u8) -> Result<&Arc<Mutex<StorageCell>>, StorageError> {
        let key = ObjectKey::new(index, sub);
        self.cells.get(&key).ok_or(StorageError::NoSuchEntry { key })
    }

    /// Bind a typed accessor to an entry
    pub fn entry<T: ScalarValue>(
        &self,
        index: u16,
        sub: u8,
    ) -> Result<EntryHandle<T>, StorageError> {
        let cell = self.cell(index, sub)?;
        {
            let cell = cell.lock().unwrap();
            if T::DATA_TYPE != cell.entry.data_type {
                return Err(StorageError::TypeMismatch {
                    key: cell.entry.key,
                });
            }
        }
        Ok(EntryHandle {
            cell: cell.clone(),
            _marker: PhantomData,
        })
    }

    /// Typed read, consulting a mounted read delegate first
    pub fn get<T: ScalarValue>(&self, index: u16, sub: u8) -> Result<T, StorageError> {
        self.entry::<T>(index, sub)?.get()
    }

    /// Typed write, forwarding through a mounted write delegate
    pub fn set<T: ScalarValue>(&self, index: u16, sub: u8, value: T) -> Result<(), StorageError> {
        self.entry::<T>(index, sub)?.set(value)
    }

    /// Apply the dictionary init value to the live value
    ///
    /// Entries without an init value are left untouched. The write delegate, if mounted, sees
    /// the applied value.
    pub fn init(&self, index: u16, sub: u8) -> Result<(), StorageError> {
        let cell = self.cell(index, sub)?;
        let mut cell = cell.lock().unwrap();
        let Some(value) = cell.entry.init_val.clone() else {
            return Ok(());
        };
        cell.store(value)
    }

    /// Apply init values to every entry that has one
    pub fn init_all(&self) -> Result<(), StorageError> {
        for entry in self.dict.iter() {
            self.init(entry.key.index, entry.key.sub)?;
        }
        Ok(())
    }

    /// Mount a PDO slot on an entry
    ///
    /// Returns the entry's byte size. A present write delegate is primed immediately with the
    /// current encoding (live value, else init value, else zeros), so RPDO buffers start from
    /// the last known state.
    pub fn map(
        &self,
        index: u16,
        sub: u8,
        read_delegate: Option<ReadDelegate>,
        write_delegate: Option<WriteDelegate>,
    ) -> Result<usize, StorageError> {
        let cell = self.cell(index, sub)?;
        let mut cell = cell.lock().unwrap();
        let key = cell.entry.key;
        let size = cell
            .entry
            .byte_size()
            .ok_or(StorageError::Unmappable { key })?;
        if let Some(write_delegate) = &write_delegate {
            let bytes = cell
                .value
                .clone()
                .or_else(|| cell.entry.init_val.clone())
                .map(|v| v.raw())
                .unwrap_or_else(|| vec![0; size]);
            write_delegate(&cell.entry, &bytes)?;
        }
        cell.read_delegate = read_delegate;
        cell.write_delegate = write_delegate;
        Ok(size)
    }

    /// Unmount all PDO slots, releasing the buffers the delegates hold
    pub fn clear_mappings(&self) {
        for cell in self.cells.values() {
            let mut cell = cell.lock().unwrap();
            cell.read_delegate = None;
            cell.write_delegate = None;
        }
    }

    /// Build a diagnostic string reader for an entry
    ///
    /// With `cached` set the reader returns the live value without consulting a read delegate;
    /// otherwise each call refreshes through the delegate first.
    pub fn string_reader(
        &self,
        index: u16,
        sub: u8,
        cached: bool,
    ) -> Result<StringReader, StorageError> {
        let cell = self.cell(index, sub)?.clone();
        Ok(Box::new(move || {
            let mut cell = cell.lock().unwrap();
            if !cached {
                cell.refresh()?;
            }
            let key = cell.entry.key;
            cell.value
                .as_ref()
                .map(|v| v.to_string())
                .ok_or(StorageError::NoValue { key })
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::dictionary::{DataType, DeviceInfo};

    use super::*;

    fn test_dict() -> Arc<ObjectDict> {
        let mut dict = ObjectDict::new(DeviceInfo::default());
        dict.insert(DictEntry {
            key: ObjectKey::new(0x2000, 1),
            desc: "speed".into(),
            data_type: DataType::UInt16,
            init_val: Some(Value::U16(100)),
            node_id_offset: false,
        });
        dict.insert(DictEntry {
            key: ObjectKey::new(0x2000, 2),
            desc: "torque".into(),
            data_type: DataType::Int16,
            init_val: None,
            node_id_offset: false,
        });
        Arc::new(dict)
    }

    fn test_storage() -> ObjectStorage {
        ObjectStorage::new(test_dict(), NodeId::new(3).unwrap())
    }

    #[test]
    fn test_typed_round_trip() {
        let storage = test_storage();
        storage.set::<u16>(0x2000, 1, 42).unwrap();
        assert_eq!(storage.get::<u16>(0x2000, 1).unwrap(), 42);
    }

    #[test]
    fn test_entry_handle() {
        let storage = test_storage();
        let handle = storage.entry::<u16>(0x2000, 1).unwrap();
        assert_eq!(handle.dict_entry().desc, "speed");

        handle.set(9).unwrap();
        assert_eq!(handle.get_cached().unwrap(), 9);
        assert_eq!(handle.get().unwrap(), 9);
    }

    #[test]
    fn test_type_mismatch() {
        let storage = test_storage();
        assert!(matches!(
            storage.set::<u32>(0x2000, 1, 42),
            Err(StorageError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unset_value() {
        let storage = test_storage();
        assert!(matches!(
            storage.get::<i16>(0x2000, 2),
            Err(StorageError::NoValue { .. })
        ));
    }

    #[test]
    fn test_init_applies_dictionary_value() {
        let storage = test_storage();
        storage.init(0x2000, 1).unwrap();
        assert_eq!(storage.get::<u16>(0x2000, 1).unwrap(), 100);

        // No init value: left unset, not an error
        storage.init(0x2000, 2).unwrap();
        assert!(storage.get::<i16>(0x2000, 2).is_err());
    }

    #[test]
    fn test_missing_entry() {
        let storage = test_storage();
        assert!(matches!(
            storage.init(0x3000, 0),
            Err(StorageError::NoSuchEntry { .. })
        ));
    }

    #[test]
    fn test_write_delegate_sees_updates() {
        let storage = test_storage();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let size = storage
            .map(
                0x2000,
                1,
                None,
                Some(Box::new(move |_entry, bytes| {
                    sink.lock().unwrap().push(bytes.to_vec());
                    Ok(())
                })),
            )
            .unwrap();
        assert_eq!(size, 2);
        // Priming pass delivered the init value
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![100, 0]]);

        storage.set::<u16>(0x2000, 1, 0x1234).unwrap();
        assert_eq!(seen.lock().unwrap().last().unwrap(), &vec![0x34, 0x12]);
    }

    #[test]
    fn test_read_delegate_refreshes() {
        let storage = test_storage();
        storage
            .map(
                0x2000,
                1,
                Some(Box::new(|_entry, bytes| {
                    bytes.copy_from_slice(&[0x21, 0x43]);
                    Ok(())
                })),
                None,
            )
            .unwrap();
        assert_eq!(storage.get::<u16>(0x2000, 1).unwrap(), 0x4321);
    }

    #[test]
    fn test_string_reader() {
        let storage = test_storage();
        storage.set::<u16>(0x2000, 1, 7).unwrap();
        let reader = storage.string_reader(0x2000, 1, true).unwrap();
        assert_eq!(reader().unwrap(), "7");
    }

    #[test]
    fn test_clear_mappings() {
        let storage = test_storage();
        storage
            .map(
                0x2000,
                1,
                Some(Box::new(|_entry, bytes| {
                    bytes.copy_from_slice(&[0xFF, 0xFF]);
                    Ok(())
                })),
                None,
            )
            .unwrap();
        storage.clear_mappings();
        storage.set::<u16>(0x2000, 1, 5).unwrap();
        // Delegate gone: reads come from the live value again
        assert_eq!(storage.get::<u16>(0x2000, 1).unwrap(), 5);
    }
}
