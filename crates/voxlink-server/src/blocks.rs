//! Block types every world served by this host knows about.

use std::sync::Arc;

use voxlink_voxel::{
    BlockRegistry, BlockRegistryError, BlockStateDef, BlockStateTable, BlockTypeDef,
};

/// Registers the built-in block types and freezes the registry.
pub fn builtin_table() -> Result<Arc<BlockStateTable>, BlockRegistryError> {
    let mut registry = BlockRegistry::new();
    registry.register(BlockTypeDef::air())?;
    for name in ["stone", "dirt", "grass", "sand", "planks"] {
        registry.register(BlockTypeDef::new(name, vec![BlockStateDef::solid("default")]))?;
    }

    let mut glass = BlockStateDef::solid("default");
    glass.opaque = false;
    glass.casts_ao = false;
    glass.cull_faces = false;
    registry.register(BlockTypeDef::new("glass", vec![glass]))?;

    registry.register(BlockTypeDef::color("color"))?;
    registry.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlink_voxel::AIR_KEY;

    #[test]
    fn test_builtin_table_resolves_default_world_blocks() {
        let table = builtin_table().unwrap();
        for key in [AIR_KEY, "stone#default", "grass#default", "glass#default"] {
            assert!(table.memo_id(key).is_some(), "{key} missing");
        }
        assert!(!table.resolve("glass#default").unwrap().opaque);
        assert!(table.memo_id("lava#default").is_none());
    }
}
