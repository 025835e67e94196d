//! Block-type registry and the global block-state memoizer.
//!
//! Block types are registered while the registry is open. [`BlockRegistry::freeze`]
//! flattens every type × declared state into a [`BlockStateTable`] indexed by a
//! dense [`MemoId`], in registration order. Each record carries the compiled
//! collider and the render flags consumers need per cell.
//!
//! Color types declare no states. Their save-keys are `"<type>#<r>-<g>-<b>"`
//! with each component in `0..16`, and every variant resolves to one shared
//! memo record backed by the canonical full-cube collider.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::collider::{ColliderBox, CompiledCollider};

/// Separator between block type and state in a save-key.
pub const KEY_SEPARATOR: char = '#';
/// Channel levels per component of a color variant.
pub const COLOR_LEVELS: u8 = 16;

/// Builds a `"<type>#<state>"` save-key.
pub fn save_key(block_type: &str, state: &str) -> String {
    format!("{block_type}{KEY_SEPARATOR}{state}")
}

/// Splits a save-key into `(type, state)`.
pub fn split_save_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(KEY_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Declared geometry and render flags of one block state.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockStateDef {
    /// State id, the part after `#` in the save-key.
    pub id: String,
    pub boxes: Vec<ColliderBox>,
    pub opaque: bool,
    pub casts_ao: bool,
    pub receives_ao: bool,
    /// Faces against opaque neighbours may be skipped when meshing.
    pub cull_faces: bool,
    pub renders: bool,
}

impl BlockStateDef {
    /// An opaque full cube.
    pub fn solid(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            boxes: CompiledCollider::full_cube().boxes().to_vec(),
            opaque: true,
            casts_ao: true,
            receives_ao: true,
            cull_faces: true,
            renders: true,
        }
    }

    /// Nothing to collide with and nothing to draw.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            boxes: Vec::new(),
            opaque: false,
            casts_ao: false,
            receives_ao: false,
            cull_faces: false,
            renders: false,
        }
    }

    /// Rendered, pickable, but entities pass through.
    pub fn decoration(id: impl Into<String>, boxes: Vec<ColliderBox>) -> Self {
        Self {
            id: id.into(),
            boxes,
            opaque: false,
            casts_ao: false,
            receives_ao: true,
            cull_faces: false,
            renders: true,
        }
    }
}

/// Variant space of a block type.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockVariants {
    /// Explicitly declared states.
    States(Vec<BlockStateDef>),
    /// The 16×16×16 color space, all sharing the full-cube collider.
    Color,
}

/// A registered block type.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockTypeDef {
    pub name: String,
    pub variants: BlockVariants,
}

impl BlockTypeDef {
    pub fn new(name: impl Into<String>, states: Vec<BlockStateDef>) -> Self {
        Self {
            name: name.into(),
            variants: BlockVariants::States(states),
        }
    }

    pub fn color(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: BlockVariants::Color,
        }
    }

    /// The `air` type with its single `default` state.
    pub fn air() -> Self {
        Self::new("air", vec![BlockStateDef::empty("default")])
    }
}

/// Errors that can occur during block type registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockRegistryError {
    #[error("block registry is frozen, cannot register {0}")]
    Frozen(String),
    #[error("duplicate block type name: {0}")]
    DuplicateType(String),
    #[error("block type {block_type} declares state {state} twice")]
    DuplicateState { block_type: String, state: String },
    #[error("block type {0} declares no states")]
    NoStates(String),
    #[error("invalid block identifier {0:?}")]
    InvalidName(String),
    #[error("block state table is full")]
    Full,
}

// ---------------------------------------------------------------------------
// Memoized table
// ---------------------------------------------------------------------------

/// Dense index of a compiled block state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoId(pub u32);

/// Compiled record for one block state.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMemo {
    /// Save-key of the state. Color types use `"<type>#color"`.
    pub save_key: String,
    collider: usize,
    pub opaque: bool,
    pub casts_ao: bool,
    pub receives_ao: bool,
    pub cull_faces: bool,
    pub renders: bool,
}

/// Registry snapshot flattened into memoized records.
#[derive(Debug)]
pub struct BlockStateTable {
    memos: Vec<BlockMemo>,
    colliders: Vec<CompiledCollider>,
    by_key: FxHashMap<String, MemoId>,
    color_types: FxHashMap<String, MemoId>,
}

impl BlockStateTable {
    /// Memo id of a save-key, resolving color variants to their shared record.
    pub fn memo_id(&self, key: &str) -> Option<MemoId> {
        if let Some(&id) = self.by_key.get(key) {
            return Some(id);
        }
        let (block_type, state) = split_save_key(key)?;
        let &id = self.color_types.get(block_type)?;
        parse_color(state).map(|_| id)
    }

    pub fn memo(&self, id: MemoId) -> Option<&BlockMemo> {
        self.memos.get(id.0 as usize)
    }

    /// Compiled collider of a memo record.
    pub fn collider(&self, id: MemoId) -> Option<&CompiledCollider> {
        let memo = self.memo(id)?;
        self.colliders.get(memo.collider)
    }

    /// Looks up a memo record by save-key.
    pub fn resolve(&self, key: &str) -> Option<&BlockMemo> {
        self.memo(self.memo_id(key)?)
    }

    /// Number of memo records.
    pub fn len(&self) -> usize {
        self.memos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memos.is_empty()
    }

    /// Number of distinct compiled colliders.
    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MemoId, &BlockMemo)> {
        self.memos
            .iter()
            .enumerate()
            .map(|(i, m)| (MemoId(i as u32), m))
    }
}

/// Parses `"<r>-<g>-<b>"` with each component in `0..16`.
pub fn parse_color(state: &str) -> Option<[u8; 3]> {
    let mut parts = state.split('-').map(|p| p.parse::<u8>().ok());
    let rgb = [parts.next()??, parts.next()??, parts.next()??];
    if parts.next().is_some() || rgb.iter().any(|&c| c >= COLOR_LEVELS) {
        return None;
    }
    Some(rgb)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Append-only block-type registry with a two-phase lifecycle.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    types: Vec<BlockTypeDef>,
    names: FxHashMap<String, usize>,
    table: Option<Arc<BlockStateTable>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block type.
    ///
    /// # Errors
    ///
    /// Rejects registrations after [`BlockRegistry::freeze`], duplicate
    /// names or states, empty state lists and identifiers containing `#`.
    pub fn register(&mut self, def: BlockTypeDef) -> Result<(), BlockRegistryError> {
        if self.table.is_some() {
            return Err(BlockRegistryError::Frozen(def.name));
        }
        if def.name.is_empty() || def.name.contains(KEY_SEPARATOR) {
            return Err(BlockRegistryError::InvalidName(def.name));
        }
        if self.names.contains_key(&def.name) {
            return Err(BlockRegistryError::DuplicateType(def.name));
        }
        if let BlockVariants::States(states) = &def.variants {
            if states.is_empty() {
                return Err(BlockRegistryError::NoStates(def.name));
            }
            let mut seen = rustc_hash::FxHashSet::default();
            for state in states {
                if state.id.is_empty() || state.id.contains(KEY_SEPARATOR) {
                    return Err(BlockRegistryError::InvalidName(state.id.clone()));
                }
                if !seen.insert(state.id.as_str()) {
                    return Err(BlockRegistryError::DuplicateState {
                        block_type: def.name.clone(),
                        state: state.id.clone(),
                    });
                }
            }
        }
        self.names.insert(def.name.clone(), self.types.len());
        self.types.push(def);
        Ok(())
    }

    /// Returns `true` once the table has been built.
    pub fn is_frozen(&self) -> bool {
        self.table.is_some()
    }

    pub fn get(&self, name: &str) -> Option<&BlockTypeDef> {
        self.names.get(name).map(|&i| &self.types[i])
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Closes registration and builds the memoized table.
    ///
    /// Calling it again returns the same table.
    pub fn freeze(&mut self) -> Result<Arc<BlockStateTable>, BlockRegistryError> {
        if let Some(table) = &self.table {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(build_table(&self.types)?);
        tracing::info!(
            "Block registry frozen: {} types, {} states, {} colliders",
            self.types.len(),
            table.len(),
            table.collider_count()
        );
        self.table = Some(Arc::clone(&table));
        Ok(table)
    }

    /// The frozen table, if [`BlockRegistry::freeze`] has run.
    pub fn table(&self) -> Option<&Arc<BlockStateTable>> {
        self.table.as_ref()
    }
}

fn build_table(types: &[BlockTypeDef]) -> Result<BlockStateTable, BlockRegistryError> {
    let mut table = BlockStateTable {
        memos: Vec::new(),
        colliders: Vec::new(),
        by_key: FxHashMap::default(),
        color_types: FxHashMap::default(),
    };
    let mut canonical_cube: Option<usize> = None;

    for def in types {
        match &def.variants {
            BlockVariants::States(states) => {
                for state in states {
                    let id = next_id(&table)?;
                    table.colliders.push(CompiledCollider::new(state.boxes.clone()));
                    let key = save_key(&def.name, &state.id);
                    table.by_key.insert(key.clone(), id);
                    table.memos.push(BlockMemo {
                        save_key: key,
                        collider: table.colliders.len() - 1,
                        opaque: state.opaque,
                        casts_ao: state.casts_ao,
                        receives_ao: state.receives_ao,
                        cull_faces: state.cull_faces,
                        renders: state.renders,
                    });
                }
            }
            BlockVariants::Color => {
                let id = next_id(&table)?;
                let collider = *canonical_cube.get_or_insert_with(|| {
                    table.colliders.push(CompiledCollider::full_cube());
                    table.colliders.len() - 1
                });
                table.color_types.insert(def.name.clone(), id);
                table.memos.push(BlockMemo {
                    save_key: save_key(&def.name, "color"),
                    collider,
                    opaque: true,
                    casts_ao: true,
                    receives_ao: true,
                    cull_faces: true,
                    renders: true,
                });
            }
        }
    }
    Ok(table)
}

fn next_id(table: &BlockStateTable) -> Result<MemoId, BlockRegistryError> {
    u32::try_from(table.memos.len())
        .map(MemoId)
        .map_err(|_| BlockRegistryError::Full)
}
