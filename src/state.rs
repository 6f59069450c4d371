//! State table: the three coupled mappings (`seqOf`, `tokenOf`, `prefixOf`) plus the IBLT
//! update path that keeps them and the local sketch consistent.

use std::collections::HashMap;

use crate::hash::token;
use crate::iblt::Iblt;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MissingData {
    pub prefix: String,
    pub low_seq: u32,
    pub high_seq: u32,
}

#[derive(Debug)]
pub struct StateTable {
    seq_of: HashMap<String, u32>,
    token_of: HashMap<String, u32>,
    prefix_of: HashMap<u32, String>,
}

impl StateTable {
    pub fn new() -> Self {
        Self { seq_of: HashMap::new(), token_of: HashMap::new(), prefix_of: HashMap::new() }
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.seq_of.contains_key(prefix)
    }

    pub fn seq_of(&self, prefix: &str) -> u32 {
        self.seq_of.get(prefix).copied().unwrap_or(0)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.seq_of.keys().map(|s| s.as_str())
    }

    /// Registers a known participant prefix with seq 0, idempotently. No IBLT mutation.
    pub fn add_node(&mut self, prefix: &str) {
        self.seq_of.entry(prefix.to_string()).or_insert(0);
    }

    /// Removes a prefix entirely, erasing its current token from `iblt` if it has one.
    pub fn remove_node(&mut self, prefix: &str, iblt: &mut Iblt) {
        let seq = self.seq_of.remove(prefix).unwrap_or(0);
        if seq > 0 {
            let key = token(prefix, seq);
            iblt.erase(key);
            self.token_of.remove(&token_string_key(prefix, seq));
            self.prefix_of.remove(&key);
        }
    }

    /// Advances `prefix` to `seq`, mutating `iblt` to replace the old token (if any) with
    /// the new one. No-op if `seq <= current seq` (weak idempotence).
    pub fn update_seq(&mut self, prefix: &str, seq: u32, iblt: &mut Iblt) -> bool {
        let current = self.seq_of(prefix);
        if seq <= current {
            return false;
        }
        if current > 0 {
            let old_key = token(prefix, current);
            iblt.erase(old_key);
            self.token_of.remove(&token_string_key(prefix, current));
            self.prefix_of.remove(&old_key);
        }
        let new_key = token(prefix, seq);
        iblt.insert(new_key);
        self.token_of.insert(token_string_key(prefix, seq), new_key);
        self.prefix_of.insert(new_key, prefix.to_string());
        self.seq_of.insert(prefix.to_string(), seq);
        true
    }

    pub fn prefix_for_token(&self, tok: u32) -> Option<&str> {
        self.prefix_of.get(&tok).map(|s| s.as_str())
    }
}

fn token_string_key(prefix: &str, seq: u32) -> String {
    crate::hash::token_string(prefix, seq)
}
