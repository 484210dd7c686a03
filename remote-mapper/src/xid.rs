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
use std::hash::{Hash, Hasher};

/// Two-phase-commit transaction identifier.
///
/// The client and the server may run different XA implementations, so two
/// `Xid`s compare equal when their global transaction ids match; the branch
/// qualifier and format id deliberately do not participate in equality.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Xid {
    pub format_id: u32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: u32, global_transaction_id: Vec<u8>, branch_qualifier: Vec<u8>) -> Self {
        Xid {
            format_id,
            global_transaction_id,
            branch_qualifier,
        }
    }

    /// Xid carrying only a global id, as minted by a transaction coordinator
    /// that works with plain strings.
    pub fn from_global(global: &str) -> Self {
        Xid {
            format_id: 0,
            global_transaction_id: global.as_bytes().to_vec(),
            branch_qualifier: Vec::new(),
        }
    }
}

impl PartialEq for Xid {
    fn eq(&self, other: &Self) -> bool {
        self.global_transaction_id == other.global_transaction_id
    }
}

impl Eq for Xid {}

impl Hash for Xid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.global_transaction_id.hash(state);
    }
}

#[test]
fn xid_equality_ignores_branch_and_format() {
    let a = Xid::new(1, b"gtx-1".to_vec(), b"branch-a".to_vec());
    let b = Xid::new(7, b"gtx-1".to_vec(), b"branch-b".to_vec());
    assert_eq!(a, b);

    let c = Xid::from_global("gtx-2");
    assert_ne!(a, c);
}

#[test]
fn xid_survives_serialization() {
    let xid = Xid::new(3, b"gtx-9".to_vec(), b"bq".to_vec());
    let bytes = bincode::serialize(&xid).unwrap();
    let back: Xid = bincode::deserialize(&bytes).unwrap();
    assert_eq!(back, xid);
    assert_eq!(back.branch_qualifier, xid.branch_qualifier);
    assert_eq!(back.format_id, xid.format_id);
}
