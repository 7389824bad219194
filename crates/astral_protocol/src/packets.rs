//! Packet definitions, grouped by protocol surface.

pub mod game;
pub mod internal;

/// Defines a plain struct whose fields encode and decode in declaration
/// order.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$fmeta:meta])* pub $field:ident: $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Debug, Default)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)*
        }

        impl $crate::Encode for $name {
            fn encode(&self, mut w: impl ::std::io::Write) -> ::anyhow::Result<()> {
                let _ = &mut w;
                $($crate::Encode::encode(&self.$field, &mut w)?;)*
                Ok(())
            }
        }

        impl $crate::Decode for $name {
            fn decode(r: &mut &[u8]) -> ::anyhow::Result<Self> {
                let _ = &*r;
                Ok(Self {
                    $($field: $crate::Decode::decode(r)?,)*
                })
            }
        }
    };
}

/// Like [`wire_struct!`] but also binds the struct to an opcode.
macro_rules! wire_packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($opcode:expr) {
            $($(#[$fmeta:meta])* pub $field:ident: $ty:ty),* $(,)?
        }
    ) => {
        $crate::packets::wire_struct! {
            $(#[$meta])*
            pub struct $name {
                $($(#[$fmeta])* pub $field: $ty,)*
            }
        }

        impl $crate::Packet for $name {
            const OPCODE: u16 = $opcode;
            const NAME: &'static str = stringify!($name);
        }
    };
}

pub(crate) use {wire_packet, wire_struct};
