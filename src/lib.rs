#![doc = include_str!("../README.md")]

pub use {
    astral_channel as channel, astral_data as data, astral_entity as entity,
    astral_protocol as protocol, astral_zone as zone,
};
// Not aliased to `core` to avoid clashing with the sysroot crate.
pub use astral_core;

/// The most commonly used types, re-exported in one place.
pub mod prelude {
    pub use astral_channel::{
        ChangeSetStore, ChannelConfig, ChannelServer, ClientRegistry, ClientSession,
        ConnectionState, DatabaseChangeSet, MemoryStore, ParseOutcome,
    };
    pub use astral_core::{ClientTime, EntityId, EntityIdAllocator, ServerClock, ServerTime};
    pub use astral_data::{CorrectTbl, CorrectTblEntry, DefinitionRegistry, DurationType};
    pub use astral_entity::{
        ActiveEntity, CharacterBacking, CoreStats, DemonBacking, EnemyBacking, EntityBacking,
        EntityKind, StatusApplication, StatusEffect,
    };
    pub use astral_protocol::{Decode, Encode, Packet, PacketDecoder, PacketEncoder};
    pub use astral_zone::{Placement, Subscriber, Zone, ZoneKey, ZoneManager};
}
