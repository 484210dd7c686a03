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

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A dynamically-typed column value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Opaque row identifier. Ids are assigned by the caller when a row is
/// created and stay stable across the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub String);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId(id.to_owned())
    }
}

/// One row of one table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Row {
    pub table: String,
    pub id: RowId,
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(table: &str, id: impl Into<RowId>) -> Self {
        Row {
            table: table.to_owned(),
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.values.insert(column.to_owned(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Rows changed by another session that caches elsewhere must drop.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidations {
    pub modified: HashSet<RowId>,
    pub deleted: HashSet<RowId>,
}

impl Invalidations {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Merges `other` into this accumulator.
    pub fn add(&mut self, other: &Invalidations) {
        self.modified.extend(other.modified.iter().cloned());
        self.deleted.extend(other.deleted.iter().cloned());
    }
}

#[test]
fn invalidations_accumulate() {
    let mut acc = Invalidations::default();
    assert!(acc.is_empty());

    let mut first = Invalidations::default();
    first.modified.insert(RowId::from("r1"));
    let mut second = Invalidations::default();
    second.deleted.insert(RowId::from("r2"));

    acc.add(&first);
    acc.add(&second);
    assert!(!acc.is_empty());
    assert!(acc.modified.contains(&RowId::from("r1")));
    assert!(acc.deleted.contains(&RowId::from("r2")));
}
