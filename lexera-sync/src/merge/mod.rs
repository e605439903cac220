pub mod conflict;
pub mod three_way;

pub use conflict::{
    apply_resolution, Conflict, ConflictEntity, EntityType, FieldDiff, Resolution,
    PLACEMENT_FIELD,
};
pub use three_way::{three_way_merge, MergeResult};
