//! Sled-backed persistence for entities, missions and mission items

use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use crate::error::StorageError;
use crate::store::{EntityRecord, MissionDelta, MissionItemRecord, MissionRecord, SweepBounds};

const TREE_ENTITIES: &str = "entities";
const TREE_ENTITY_UIDS: &str = "entity_uids";
const TREE_MISSIONS: &str = "missions";
const TREE_MISSION_KEYS: &str = "mission_keys";
const TREE_MISSION_ITEMS: &str = "mission_items";
const TREE_ITEM_UIDS: &str = "item_uids";

type TxResult<T> = ConflictableTransactionResult<T, String>;

/// Entity and mission store.
///
/// Trees:
/// - `entities`: local id (big-endian) -> [`EntityRecord`]
/// - `entity_uids`: uid -> local id
/// - `missions`: mission id -> [`MissionRecord`]
/// - `mission_keys`: `server\0name` -> mission id
/// - `mission_items`: mission id ++ uid -> [`MissionItemRecord`]
/// - `item_uids`: uid ++ `\0` ++ mission id -> empty, one entry per mission item
pub struct Store {
    db: Db,
    entities: Tree,
    entity_uids: Tree,
    missions: Tree,
    mission_keys: Tree,
    mission_items: Tree,
    item_uids: Tree,
    write_lock: Mutex<()>,
}

/// Result of an entity upsert
#[derive(Debug, Clone)]
pub struct EntityUpsert {
    pub record: EntityRecord,
    pub previous: Option<EntityRecord>,
}

impl EntityUpsert {
    pub fn created(&self) -> bool {
        self.previous.is_none()
    }
}

impl Store {
    /// Open (or create) a store at the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Self::new(db)
    }

    pub fn new(db: Db) -> Result<Self, StorageError> {
        let entities = db.open_tree(TREE_ENTITIES).map_err(to_storage_io)?;
        let entity_uids = db.open_tree(TREE_ENTITY_UIDS).map_err(to_storage_io)?;
        let missions = db.open_tree(TREE_MISSIONS).map_err(to_storage_io)?;
        let mission_keys = db.open_tree(TREE_MISSION_KEYS).map_err(to_storage_io)?;
        let mission_items = db.open_tree(TREE_MISSION_ITEMS).map_err(to_storage_io)?;
        let item_uids = db.open_tree(TREE_ITEM_UIDS).map_err(to_storage_io)?;
        let store = Self {
            db,
            entities,
            entity_uids,
            missions,
            mission_keys,
            mission_items,
            item_uids,
            write_lock: Mutex::new(()),
        };
        if store.item_uids.is_empty() && !store.mission_items.is_empty() {
            store.rebuild_item_index()?;
        }
        Ok(store)
    }

    /// Regenerate `item_uids` from `mission_items`, for stores written before the index existed
    fn rebuild_item_index(&self) -> Result<(), StorageError> {
        let mut count = 0usize;
        for entry in self.mission_items.iter() {
            let (key, _) = entry.map_err(to_storage_io)?;
            let (mission_id, uid) = split_item_key(&key)?;
            self.item_uids
                .insert(uid_index_key(uid, mission_id), &b""[..])
                .map_err(to_storage_io)?;
            count += 1;
        }
        debug!(items = count, "Rebuilt mission item uid index");
        Ok(())
    }

    pub fn shared<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::open(path)?))
    }

    /// Take the single write lock. Every mutation goes through the returned writer.
    pub fn writer(&self) -> StoreWriter<'_> {
        StoreWriter {
            store: self,
            _guard: self.write_lock.lock(),
        }
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    pub fn get_entity(&self, local_id: u64) -> Result<Option<EntityRecord>, StorageError> {
        get_decoded(&self.entities, &id_key(local_id))
    }

    pub fn find_entity_by_uid(&self, uid: &str) -> Result<Option<EntityRecord>, StorageError> {
        match self.entity_uids.get(uid.as_bytes()).map_err(to_storage_io)? {
            Some(id) => self.get_entity(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn list_entities(&self) -> Result<Vec<EntityRecord>, StorageError> {
        list_decoded(&self.entities)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn get_mission(&self, mission_id: u64) -> Result<Option<MissionRecord>, StorageError> {
        get_decoded(&self.missions, &id_key(mission_id))
    }

    pub fn find_mission(
        &self,
        server_host: &str,
        name: &str,
    ) -> Result<Option<MissionRecord>, StorageError> {
        let key = mission_key(server_host, name);
        match self.mission_keys.get(key.as_bytes()).map_err(to_storage_io)? {
            Some(id) => self.get_mission(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn list_missions(&self) -> Result<Vec<MissionRecord>, StorageError> {
        list_decoded(&self.missions)
    }

    /// Items a mission currently declares, ordered by uid
    pub fn mission_items(&self, mission_id: u64) -> Result<Vec<MissionItemRecord>, StorageError> {
        let mut items = Vec::new();
        for entry in self.mission_items.scan_prefix(id_key(mission_id)) {
            let (_, value) = entry.map_err(to_storage_io)?;
            items.push(bincode::deserialize(&value).map_err(to_storage_data)?);
        }
        Ok(items)
    }

    /// Items across all missions that reference `uid`
    pub fn items_for_uid(&self, uid: &str) -> Result<Vec<MissionItemRecord>, StorageError> {
        let prefix = uid_index_prefix(uid.as_bytes());
        let mut items = Vec::new();
        for entry in self.item_uids.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(to_storage_io)?;
            if key.len() != prefix.len() + 8 {
                continue;
            }
            let mission_id = decode_id(&key[prefix.len()..])?;
            if let Some(item) = get_decoded(&self.mission_items, &item_key(mission_id, uid))? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

/// Holder of the store's write lock
pub struct StoreWriter<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
}

impl Deref for StoreWriter<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store
    }
}

impl StoreWriter<'_> {
    /// Insert or update the entity for `uid`.
    ///
    /// `build` receives the existing record, if any, and the local id to use. A new uid is
    /// assigned a fresh id; an existing uid keeps its id.
    pub fn upsert_entity<F>(&self, uid: &str, build: F) -> Result<EntityUpsert, StorageError>
    where
        F: FnOnce(Option<&EntityRecord>, u64) -> EntityRecord,
    {
        let previous = self.store.find_entity_by_uid(uid)?;
        let local_id = match &previous {
            Some(existing) => existing.local_id,
            None => self.store.db.generate_id().map_err(to_storage_io)?,
        };
        let record = build(previous.as_ref(), local_id);
        self.write_entity(&record)?;
        Ok(EntityUpsert { record, previous })
    }

    /// Write a complete record under its own local id, replacing any other id the uid held.
    pub fn put_entity(&self, record: &EntityRecord) -> Result<(), StorageError> {
        self.write_entity(record)
    }

    fn write_entity(&self, record: &EntityRecord) -> Result<(), StorageError> {
        let value = bincode::serialize(record).map_err(to_storage_data)?;
        let key = id_key(record.local_id);
        (&self.store.entities, &self.store.entity_uids)
            .transaction(|(entities, uids)| -> TxResult<()> {
                if let Some(old) = uids.insert(record.uid.as_bytes(), &key[..])? {
                    if old[..] != key[..] {
                        entities.remove(old)?;
                    }
                }
                entities.insert(&key[..], value.clone())?;
                Ok(())
            })
            .map_err(to_storage_tx)
    }

    /// Insert or update the mission named `name` on `server_host`
    pub fn upsert_mission<F>(
        &self,
        server_host: &str,
        name: &str,
        build: F,
    ) -> Result<MissionRecord, StorageError>
    where
        F: FnOnce(Option<&MissionRecord>, u64) -> MissionRecord,
    {
        let previous = self.store.find_mission(server_host, name)?;
        let mission_id = match &previous {
            Some(existing) => existing.mission_id,
            None => self.store.db.generate_id().map_err(to_storage_io)?,
        };
        let record = build(previous.as_ref(), mission_id);
        let value = bincode::serialize(&record).map_err(to_storage_data)?;
        let key = id_key(mission_id);
        let name_key = mission_key(server_host, name);

        (&self.store.missions, &self.store.mission_keys)
            .transaction(|(missions, keys)| -> TxResult<()> {
                missions.insert(&key[..], value.clone())?;
                keys.insert(name_key.as_bytes(), &key[..])?;
                Ok(())
            })
            .map_err(to_storage_tx)?;
        Ok(record)
    }

    /// Remove a mission record together with any items it still owns. Entities are untouched.
    pub fn delete_mission(&self, mission_id: u64) -> Result<bool, StorageError> {
        let Some(record) = self.store.get_mission(mission_id)? else {
            return Ok(false);
        };
        let key = id_key(mission_id);
        let name_key = mission_key(&record.server_host, &record.name);
        let item_keys = self.item_keys(mission_id)?;
        let mut index_keys = Vec::with_capacity(item_keys.len());
        for item_key in &item_keys {
            let (_, uid) = split_item_key(item_key)?;
            index_keys.push(uid_index_key(uid, mission_id));
        }

        (
            &self.store.missions,
            &self.store.mission_keys,
            &self.store.mission_items,
            &self.store.item_uids,
        )
            .transaction(|(missions, keys, items, index)| -> TxResult<()> {
                missions.remove(&key[..])?;
                keys.remove(name_key.as_bytes())?;
                for item_key in &item_keys {
                    items.remove(item_key.as_slice())?;
                }
                for index_key in &index_keys {
                    index.remove(index_key.as_slice())?;
                }
                Ok(())
            })
            .map_err(to_storage_tx)?;
        debug!(mission = %record.name, items = item_keys.len(), "Deleted mission");
        Ok(true)
    }

    /// Apply one reconciliation as a single transaction.
    ///
    /// Aborts if the mission record disappeared since the delta was computed.
    pub fn apply_mission_delta(&self, delta: &MissionDelta) -> Result<(), StorageError> {
        let mission = id_key(delta.mission_id);
        let removed_items: Vec<(Vec<u8>, Vec<u8>)> = delta
            .remove_items
            .iter()
            .map(|uid| {
                (
                    item_key(delta.mission_id, uid),
                    uid_index_key(uid.as_bytes(), delta.mission_id),
                )
            })
            .collect();
        let mut added_items = Vec::with_capacity(delta.add_items.len());
        for item in &delta.add_items {
            let value = bincode::serialize(item).map_err(to_storage_data)?;
            added_items.push((
                item_key(item.mission_id, &item.uid),
                uid_index_key(item.uid.as_bytes(), item.mission_id),
                value,
            ));
        }

        (
            &self.store.missions,
            &self.store.mission_items,
            &self.store.item_uids,
            &self.store.entities,
            &self.store.entity_uids,
        )
            .transaction(|(missions, items, index, entities, uids)| -> TxResult<()> {
                if missions.get(&mission[..])?.is_none() {
                    return Err(ConflictableTransactionError::Abort(format!(
                        "mission {} no longer exists",
                        delta.mission_id
                    )));
                }
                for (key, index_key) in &removed_items {
                    items.remove(key.as_slice())?;
                    index.remove(index_key.as_slice())?;
                }
                for (local_id, uid) in &delta.remove_entities {
                    entities.remove(&id_key(*local_id)[..])?;
                    uids.remove(uid.as_bytes())?;
                }
                for (key, index_key, value) in &added_items {
                    items.insert(key.as_slice(), value.clone())?;
                    index.insert(index_key.as_slice(), &b""[..])?;
                }
                Ok(())
            })
            .map_err(to_storage_tx)
    }

    /// Point an existing mission item at its entity. Returns false if the item is gone.
    pub fn link_mission_item(
        &self,
        mission_id: u64,
        uid: &str,
        entity_id: u64,
    ) -> Result<bool, StorageError> {
        let key = item_key(mission_id, uid);
        let Some(raw) = self.store.mission_items.get(&key).map_err(to_storage_io)? else {
            return Ok(false);
        };
        let mut item: MissionItemRecord = bincode::deserialize(&raw).map_err(to_storage_data)?;
        if item.entity_id == Some(entity_id) {
            return Ok(true);
        }
        item.entity_id = Some(entity_id);
        let value = bincode::serialize(&item).map_err(to_storage_data)?;
        self.store
            .mission_items
            .insert(key, value)
            .map_err(to_storage_io)?;
        Ok(true)
    }

    /// Delete every entity the bounds select. Returns the removed records.
    pub fn sweep(&self, bounds: &SweepBounds) -> Result<Vec<EntityRecord>, StorageError> {
        let doomed: Vec<EntityRecord> = self
            .store
            .list_entities()?
            .into_iter()
            .filter(|record| bounds.matches(record))
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        (&self.store.entities, &self.store.entity_uids)
            .transaction(|(entities, uids)| -> TxResult<()> {
                for record in &doomed {
                    entities.remove(&id_key(record.local_id)[..])?;
                    uids.remove(record.uid.as_bytes())?;
                }
                Ok(())
            })
            .map_err(to_storage_tx)?;
        Ok(doomed)
    }

    fn item_keys(&self, mission_id: u64) -> Result<Vec<Vec<u8>>, StorageError> {
        let mut keys = Vec::new();
        for entry in self.store.mission_items.scan_prefix(id_key(mission_id)) {
            let (key, _) = entry.map_err(to_storage_io)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_id(raw: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| {
        StorageError::IoError(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Index entry has {} bytes, expected 8", raw.len()),
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

fn mission_key(server_host: &str, name: &str) -> String {
    format!("{}\0{}", server_host, name)
}

fn item_key(mission_id: u64, uid: &str) -> Vec<u8> {
    let mut key = id_key(mission_id).to_vec();
    key.extend_from_slice(uid.as_bytes());
    key
}

fn split_item_key(key: &[u8]) -> Result<(u64, &[u8]), StorageError> {
    if key.len() < 8 {
        return Err(StorageError::IoError(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Mission item key has {} bytes", key.len()),
        )));
    }
    let (id, uid) = key.split_at(8);
    Ok((decode_id(id)?, uid))
}

fn uid_index_prefix(uid: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(uid.len() + 9);
    prefix.extend_from_slice(uid);
    prefix.push(0);
    prefix
}

fn uid_index_key(uid: &[u8], mission_id: u64) -> Vec<u8> {
    let mut key = uid_index_prefix(uid);
    key.extend_from_slice(&id_key(mission_id));
    key
}

fn get_decoded<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>, StorageError> {
    let Some(raw) = tree.get(key).map_err(to_storage_io)? else {
        return Ok(None);
    };
    Ok(Some(bincode::deserialize(&raw).map_err(to_storage_data)?))
}

fn list_decoded<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    let mut records = Vec::new();
    for entry in tree.iter() {
        let (_, value) = entry.map_err(to_storage_io)?;
        records.push(bincode::deserialize(&value).map_err(to_storage_data)?);
    }
    Ok(records)
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn to_storage_data(err: bincode::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

fn to_storage_tx(err: TransactionError<String>) -> StorageError {
    match err {
        TransactionError::Abort(reason) => StorageError::TransactionAborted(reason),
        TransactionError::Storage(e) => to_storage_io(e),
    }
}
