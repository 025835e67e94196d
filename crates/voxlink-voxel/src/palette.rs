//! Per-chunk block-state palette.
//!
//! Cells store a small local index instead of a global id. The palette maps
//! each save-key to its index and keeps three flat arrays indexed by that
//! same local index: the save-key, the split `(type, state)` pair and the
//! global [`MemoId`]. A slot is `None` only after [`ChunkPalette::clean`]
//! reclaimed it, and reclaimed slots are reused by later insertions.
//!
//! Index 0 is always `air#default` and is never reclaimed, so a zeroed cell
//! array is a valid all-air chunk.

use rustc_hash::FxHashMap;

use crate::registry::{BlockStateTable, MemoId, split_save_key};

/// Save-key held by palette index 0.
pub const AIR_KEY: &str = "air#default";

/// Errors from palette operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaletteError {
    /// The save-key is not in the block-state table.
    #[error("unknown block state {0:?}")]
    UnknownKey(String),
    /// The save-key is not of the form `type#state`.
    #[error("malformed save-key {0:?}")]
    MalformedKey(String),
    /// All `u16` indices are in use.
    #[error("chunk palette is full")]
    Full,
    /// The block-state table has no `air#default`.
    #[error("block-state table has no {AIR_KEY}")]
    MissingAir,
    /// A stored palette holds something other than air at index 0.
    #[error("palette index 0 holds {0:?} instead of {AIR_KEY}")]
    NotAirAtZero(String),
}

/// Save-key ↔ local index mapping for one chunk.
#[derive(Clone, Debug)]
pub struct ChunkPalette {
    by_key: FxHashMap<String, u16>,
    flat_palette: Vec<Option<String>>,
    flat_palette_pairs: Vec<Option<(String, String)>>,
    memoized_ids: Vec<Option<MemoId>>,
    free: Vec<u16>,
}

impl ChunkPalette {
    /// A palette holding only air at index 0.
    pub fn new(table: &BlockStateTable) -> Result<Self, PaletteError> {
        let air = table.memo_id(AIR_KEY).ok_or(PaletteError::MissingAir)?;
        let mut by_key = FxHashMap::default();
        by_key.insert(AIR_KEY.to_string(), 0);
        Ok(Self {
            by_key,
            flat_palette: vec![Some(AIR_KEY.to_string())],
            flat_palette_pairs: vec![Some(("air".to_string(), "default".to_string()))],
            memoized_ids: vec![Some(air)],
            free: Vec::new(),
        })
    }

    /// Rebuilds a palette from an index-ordered key list.
    ///
    /// Empty strings mark unused slots. Index 0 must be air; an empty list
    /// yields the air-only palette.
    pub fn from_keys(keys: &[String], table: &BlockStateTable) -> Result<Self, PaletteError> {
        if keys.len() > u16::MAX as usize + 1 {
            return Err(PaletteError::Full);
        }
        if let Some(first) = keys.first()
            && first != AIR_KEY
        {
            return Err(PaletteError::NotAirAtZero(first.clone()));
        }
        let mut palette = Self::new(table)?;
        for (index, key) in keys.iter().enumerate().skip(1) {
            let index = index as u16;
            if key.is_empty() {
                palette.push_slot(None);
                palette.free.push(index);
                continue;
            }
            if palette.by_key.contains_key(key) {
                // A repeated key would make two indices alias one state.
                palette.push_slot(None);
                palette.free.push(index);
                tracing::warn!("Duplicate palette key {key:?} at index {index} ignored");
                continue;
            }
            let (memo, pair) = resolve(key, table)?;
            palette.by_key.insert(key.clone(), index);
            palette.push_slot(Some((key.clone(), pair, memo)));
        }
        // Lowest indices are reused first.
        palette.free.sort_unstable_by(|a, b| b.cmp(a));
        Ok(palette)
    }

    fn push_slot(&mut self, slot: Option<(String, (String, String), MemoId)>) {
        match slot {
            Some((key, pair, memo)) => {
                self.flat_palette.push(Some(key));
                self.flat_palette_pairs.push(Some(pair));
                self.memoized_ids.push(Some(memo));
            }
            None => {
                self.flat_palette.push(None);
                self.flat_palette_pairs.push(None);
                self.memoized_ids.push(None);
            }
        }
    }

    /// Local index of `key`, if present.
    pub fn index_of(&self, key: &str) -> Option<u16> {
        self.by_key.get(key).copied()
    }

    /// Returns the index of `key`, adding it if needed.
    pub fn get_or_insert(
        &mut self,
        key: &str,
        table: &BlockStateTable,
    ) -> Result<u16, PaletteError> {
        if let Some(index) = self.index_of(key) {
            return Ok(index);
        }
        let (memo, pair) = resolve(key, table)?;
        let index = match self.free.pop() {
            Some(index) => {
                let i = index as usize;
                self.flat_palette[i] = Some(key.to_string());
                self.flat_palette_pairs[i] = Some(pair);
                self.memoized_ids[i] = Some(memo);
                index
            }
            None => {
                let index =
                    u16::try_from(self.flat_palette.len()).map_err(|_| PaletteError::Full)?;
                self.push_slot(Some((key.to_string(), pair, memo)));
                index
            }
        };
        self.by_key.insert(key.to_string(), index);
        Ok(index)
    }

    /// Save-key at `index`.
    pub fn key(&self, index: u16) -> Option<&str> {
        self.flat_palette.get(index as usize)?.as_deref()
    }

    /// Global memo id at `index`.
    pub fn memo(&self, index: u16) -> Option<MemoId> {
        *self.memoized_ids.get(index as usize)?
    }

    /// `(type, state)` pair at `index`.
    pub fn pair(&self, index: u16) -> Option<(&str, &str)> {
        self.flat_palette_pairs
            .get(index as usize)?
            .as_ref()
            .map(|(t, s)| (t.as_str(), s.as_str()))
    }

    pub fn flat_palette(&self) -> &[Option<String>] {
        &self.flat_palette
    }

    pub fn flat_palette_pairs(&self) -> &[Option<(String, String)>] {
        &self.flat_palette_pairs
    }

    pub fn memoized_ids(&self) -> &[Option<MemoId>] {
        &self.memoized_ids
    }

    /// Index-ordered save-keys with unused slots as empty strings.
    pub fn to_keys(&self) -> Vec<String> {
        self.flat_palette
            .iter()
            .map(|k| k.clone().unwrap_or_default())
            .collect()
    }

    /// Number of live entries, air included.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of slots, including reclaimed ones.
    pub fn slot_count(&self) -> usize {
        self.flat_palette.len()
    }

    /// Reclaims every non-air index no cell references. Returns how many.
    pub fn clean(&mut self, cells: &[u16]) -> usize {
        let mut used = vec![false; self.flat_palette.len()];
        used[0] = true;
        for &cell in cells {
            if let Some(flag) = used.get_mut(cell as usize) {
                *flag = true;
            }
        }
        let mut reclaimed = 0;
        for (index, in_use) in used.into_iter().enumerate() {
            if in_use {
                continue;
            }
            if let Some(key) = self.flat_palette[index].take() {
                self.by_key.remove(&key);
                self.flat_palette_pairs[index] = None;
                self.memoized_ids[index] = None;
                self.free.push(index as u16);
                reclaimed += 1;
            }
        }
        // Trailing free slots can be dropped outright.
        while self.flat_palette.len() > 1 && self.flat_palette.last().is_some_and(Option::is_none)
        {
            self.flat_palette.pop();
            self.flat_palette_pairs.pop();
            self.memoized_ids.pop();
            let gone = self.flat_palette.len() as u16;
            self.free.retain(|&i| i != gone);
        }
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        reclaimed
    }

    /// Recomputes memo ids against a new table.
    ///
    /// On error the palette is left unchanged.
    pub fn rebind(&mut self, table: &BlockStateTable) -> Result<(), PaletteError> {
        let mut ids = Vec::with_capacity(self.memoized_ids.len());
        for key in &self.flat_palette {
            match key {
                Some(key) => ids.push(Some(
                    table
                        .memo_id(key)
                        .ok_or_else(|| PaletteError::UnknownKey(key.clone()))?,
                )),
                None => ids.push(None),
            }
        }
        self.memoized_ids = ids;
        Ok(())
    }
}

fn resolve(key: &str, table: &BlockStateTable) -> Result<(MemoId, (String, String)), PaletteError> {
    let (block_type, state) =
        split_save_key(key).ok_or_else(|| PaletteError::MalformedKey(key.to_string()))?;
    let memo = table
        .memo_id(key)
        .ok_or_else(|| PaletteError::UnknownKey(key.to_string()))?;
    Ok((memo, (block_type.to_string(), state.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BlockRegistry, BlockStateDef, BlockTypeDef};

    fn table() -> std::sync::Arc<BlockStateTable> {
        let mut registry = BlockRegistry::new();
        registry.register(BlockTypeDef::air()).unwrap();
        registry
            .register(BlockTypeDef::new("stone", vec![BlockStateDef::solid("default")]))
            .unwrap();
        registry
            .register(BlockTypeDef::new("dirt", vec![BlockStateDef::solid("default")]))
            .unwrap();
        registry.register(BlockTypeDef::color("paint")).unwrap();
        registry.freeze().unwrap()
    }

    #[test]
    fn test_air_is_index_zero() {
        let table = table();
        let palette = ChunkPalette::new(&table).unwrap();
        assert_eq!(palette.index_of(AIR_KEY), Some(0));
        assert_eq!(palette.key(0), Some(AIR_KEY));
        assert_eq!(palette.pair(0), Some(("air", "default")));
        assert_eq!(palette.memo(0), table.memo_id(AIR_KEY));
    }

    #[test]
    fn test_missing_air_rejected() {
        let mut registry = BlockRegistry::new();
        registry.register(BlockTypeDef::color("paint")).unwrap();
        let table = registry.freeze().unwrap();
        assert_eq!(ChunkPalette::new(&table).unwrap_err(), PaletteError::MissingAir);
    }

    #[test]
    fn test_insert_is_idempotent_and_flat_arrays_agree() {
        let table = table();
        let mut palette = ChunkPalette::new(&table).unwrap();
        let stone = palette.get_or_insert("stone#default", &table).unwrap();
        assert_eq!(stone, 1);
        assert_eq!(palette.get_or_insert("stone#default", &table).unwrap(), 1);
        let paint = palette.get_or_insert("paint#3-4-5", &table).unwrap();
        assert_eq!(paint, 2);
        assert_eq!(palette.flat_palette().len(), 3);
        assert_eq!(palette.flat_palette_pairs()[2], Some(("paint".into(), "3-4-5".into())));
        assert_eq!(palette.memoized_ids()[1], table.memo_id("stone#default"));
    }

    #[test]
    fn test_unknown_and_malformed_keys() {
        let table = table();
        let mut palette = ChunkPalette::new(&table).unwrap();
        assert_eq!(
            palette.get_or_insert("glass#default", &table),
            Err(PaletteError::UnknownKey("glass#default".into()))
        );
        assert_eq!(
            palette.get_or_insert("stone", &table),
            Err(PaletteError::MalformedKey("stone".into()))
        );
        assert_eq!(palette.len(), 1);
    }

    #[test]
    fn test_clean_keeps_referenced_indices() {
        let table = table();
        let mut palette = ChunkPalette::new(&table).unwrap();
        let stone = palette.get_or_insert("stone#default", &table).unwrap();
        let dirt = palette.get_or_insert("dirt#default", &table).unwrap();
        let paint = palette.get_or_insert("paint#1-1-1", &table).unwrap();
        let cells = vec![0, dirt, dirt, 0];

        assert_eq!(palette.clean(&cells), 2);
        assert_eq!(palette.key(dirt), Some("dirt#default"));
        assert_eq!(palette.key(stone), None);
        assert_eq!(palette.memo(stone), None);
        assert_eq!(palette.index_of("paint#1-1-1"), None);
        // The trailing reclaimed slot is dropped entirely.
        assert_eq!(palette.slot_count(), paint as usize);

        // Reclaimed slots are reused lowest first.
        assert_eq!(palette.get_or_insert("paint#2-2-2", &table).unwrap(), stone);
        assert_eq!(palette.get_or_insert("stone#default", &table).unwrap(), 3);
    }

    #[test]
    fn test_clean_never_reclaims_air() {
        let table = table();
        let mut palette = ChunkPalette::new(&table).unwrap();
        palette.get_or_insert("stone#default", &table).unwrap();
        let cells = vec![1u16; 8];
        assert_eq!(palette.clean(&cells), 0);
        assert_eq!(palette.key(0), Some(AIR_KEY));
    }

    #[test]
    fn test_keys_roundtrip_with_holes() {
        let table = table();
        let keys = vec![
            AIR_KEY.to_string(),
            String::new(),
            "dirt#default".to_string(),
        ];
        let mut palette = ChunkPalette::from_keys(&keys, &table).unwrap();
        assert_eq!(palette.to_keys(), keys);
        assert_eq!(palette.get_or_insert("stone#default", &table).unwrap(), 1);
    }

    #[test]
    fn test_foreign_key_at_zero_is_rejected() {
        let table = table();
        let keys = vec!["dirt#default".to_string(), AIR_KEY.to_string()];
        assert_eq!(
            ChunkPalette::from_keys(&keys, &table).unwrap_err(),
            PaletteError::NotAirAtZero("dirt#default".into())
        );
        let holed = vec![String::new(), "dirt#default".to_string()];
        assert!(matches!(
            ChunkPalette::from_keys(&holed, &table),
            Err(PaletteError::NotAirAtZero(_))
        ));
    }

    #[test]
    fn test_rebind_remaps_ids() {
        let old = table();
        let mut palette = ChunkPalette::new(&old).unwrap();
        palette.get_or_insert("dirt#default", &old).unwrap();

        let mut registry = BlockRegistry::new();
        registry
            .register(BlockTypeDef::new("dirt", vec![BlockStateDef::solid("default")]))
            .unwrap();
        registry.register(BlockTypeDef::air()).unwrap();
        let new = registry.freeze().unwrap();

        palette.rebind(&new).unwrap();
        assert_eq!(palette.memo(0), new.memo_id(AIR_KEY));
        assert_eq!(palette.memo(1), new.memo_id("dirt#default"));
        assert_ne!(palette.memo(1), old.memo_id("dirt#default"));
    }
}
