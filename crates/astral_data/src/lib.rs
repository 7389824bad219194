#![doc = include_str!("../README.md")]

pub mod binary;
mod records;
mod registry;
pub mod tables;

pub use binary::{load_records, read_header, TableHeader, TableRecord};
pub use records::{
    AppliedStatus, DevilData, DevilGrowth, DurationType, DynamicMapData, ItemData, ServerAction,
    ShopProductData, SkillData, SpawnLocation, SpawnLocationGroup, SpotData, StatusBasic,
    StatusCancel, StatusData, StatusTDamage, ZoneData, ZoneNpc, ZoneObject, ZonePartialData,
    ZoneRelationData, ZoneTrigger,
};
pub use registry::{DefinitionRegistry, DefinitionRegistryBuilder};
pub use tables::{CorrectTbl, CorrectTblEntry, NRA_ABSORB, NRA_NULL, NRA_REFLECT};
