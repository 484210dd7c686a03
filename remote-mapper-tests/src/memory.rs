// Copyright 2020 Kodebox, Inc.
// This file is part of CodeChain.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use parking_lot::Mutex;
use remote_mapper::{
    Invalidations, Mapper, MapperId, Repository, Result, Row, RowId, StorageError, Value, Xid,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Store {
    tables: HashMap<String, BTreeMap<RowId, Row>>,
    collections: HashMap<(String, RowId), Vec<Value>>,
    cluster: Invalidations,
    log: Vec<String>,
    database_created: bool,
}

/// Shared-state repository: every mapper opened on it sees the same rows,
/// like sessions of one database.
pub struct MemoryRepository {
    name: String,
    identity: String,
    store: Arc<Mutex<Store>>,
}

impl MemoryRepository {
    pub fn new(name: &str) -> Arc<MemoryRepository> {
        Arc::new(MemoryRepository {
            name: name.to_owned(),
            identity: format!("{}-mem", name),
            store: Arc::new(Mutex::new(Store::default())),
        })
    }

    /// Operations executed so far, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.store.lock().log.clone()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.store
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn database_created(&self) -> bool {
        self.store.lock().database_created
    }
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_mapper(&self) -> Result<Box<dyn Mapper>> {
        Ok(Box::new(MemoryMapper {
            identity: self.identity.clone(),
            store: self.store.clone(),
        }))
    }
}

pub struct MemoryMapper {
    identity: String,
    store: Arc<Mutex<Store>>,
}

impl Mapper for MemoryMapper {
    fn identification(&mut self) -> Result<MapperId> {
        let mut store = self.store.lock();
        store.log.push("identification".to_owned());
        Ok(MapperId(self.identity.clone()))
    }

    fn create_database(&mut self) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push("create_database".to_owned());
        store.database_created = true;
        Ok(())
    }

    fn table_size(&mut self, table: &str) -> Result<i64> {
        let mut store = self.store.lock();
        store.log.push(format!("table_size {}", table));
        Ok(store.tables.get(table).map(|rows| rows.len() as i64).unwrap_or(0))
    }

    fn insert_row(&mut self, row: Row) -> Result<RowId> {
        let mut store = self.store.lock();
        store.log.push(format!("insert_row {}/{}", row.table, row.id));
        let id = row.id.clone();
        let table = store.tables.entry(row.table.clone()).or_default();
        if table.contains_key(&id) {
            return Err(StorageError::Storage(format!(
                "duplicate row {}/{}",
                row.table, id
            )));
        }
        table.insert(id.clone(), row);
        Ok(id)
    }

    fn read_row(&mut self, table: &str, id: &RowId) -> Result<Option<Row>> {
        let mut store = self.store.lock();
        store.log.push(format!("read_row {}/{}", table, id));
        Ok(store
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    fn update_row(&mut self, row: Row) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push(format!("update_row {}/{}", row.table, row.id));
        let table = store.tables.entry(row.table.clone()).or_default();
        match table.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(StorageError::Storage(format!(
                "no such row {}/{}",
                row.table, row.id
            ))),
        }
    }

    fn delete_row(&mut self, table: &str, id: &RowId) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push(format!("delete_row {}/{}", table, id));
        if let Some(rows) = store.tables.get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    fn read_children(&mut self, parent: &RowId) -> Result<Vec<Row>> {
        let mut store = self.store.lock();
        store.log.push(format!("read_children {}", parent));
        let wanted = Value::Text(parent.0.clone());
        Ok(store
            .tables
            .get("hierarchy")
            .map(|rows| {
                rows.values()
                    .filter(|row| row.get("parent") == Some(&wanted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn read_collection(&mut self, table: &str, id: &RowId) -> Result<Vec<Value>> {
        let mut store = self.store.lock();
        store.log.push(format!("read_collection {}/{}", table, id));
        Ok(store
            .collections
            .get(&(table.to_owned(), id.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn update_collection(&mut self, table: &str, id: &RowId, values: Vec<Value>) -> Result<()> {
        let mut store = self.store.lock();
        store
            .log
            .push(format!("update_collection {}/{}", table, id));
        store
            .collections
            .insert((table.to_owned(), id.clone()), values);
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<RowId>> {
        let mut store = self.store.lock();
        store.log.push(format!("search {}", query));
        let mut ids: Vec<RowId> = Vec::new();
        for rows in store.tables.values() {
            for row in rows.values() {
                let hit = row.values.values().any(|value| match value {
                    Value::Text(text) => text.contains(query),
                    _ => false,
                });
                if hit {
                    ids.push(row.id.clone());
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn send_invalidations(&mut self, invalidations: Invalidations) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push("send_invalidations".to_owned());
        store.cluster.add(&invalidations);
        Ok(())
    }

    fn receive_invalidations(&mut self) -> Result<Invalidations> {
        let mut store = self.store.lock();
        store.log.push("receive_invalidations".to_owned());
        Ok(std::mem::take(&mut store.cluster))
    }

    fn begin(&mut self, xid: Xid) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push(format!(
            "begin {}",
            String::from_utf8_lossy(&xid.global_transaction_id)
        ));
        Ok(())
    }

    fn commit(&mut self, xid: Xid, one_phase: bool) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push(format!(
            "commit {} one_phase={}",
            String::from_utf8_lossy(&xid.global_transaction_id),
            one_phase
        ));
        Ok(())
    }

    fn rollback(&mut self, xid: Xid) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push(format!(
            "rollback {}",
            String::from_utf8_lossy(&xid.global_transaction_id)
        ));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut store = self.store.lock();
        store.log.push("close".to_owned());
        Ok(())
    }
}
