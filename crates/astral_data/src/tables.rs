/// Null / reflect / absorb indices as they appear in correct-table data.
pub const NRA_NULL: u8 = 1;
pub const NRA_REFLECT: u8 = 2;
pub const NRA_ABSORB: u8 = 3;

/// Identifies one slot of the per-entity stat table.
///
/// Discriminants match the IDs used by the binary data tables, so the raw
/// `u8` in a record converts with [`CorrectTbl::from_raw`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum CorrectTbl {
    Str = 0,
    Magic = 1,
    Vit = 2,
    Int = 3,
    Speed = 4,
    Luck = 5,
    HpMax = 6,
    MpMax = 7,
    Clsr = 8,
    Lngr = 9,
    Spell = 10,
    Support = 11,
    Pdef = 12,
    Mdef = 13,
    HpRegen = 14,
    MpRegen = 15,
    KnockbackResist = 16,
    CooldownTime = 17,
    ResistSlash = 20,
    ResistThrust = 21,
    ResistStrike = 22,
    ResistGun = 23,
    ResistFire = 24,
    ResistIce = 25,
    ResistElec = 26,
    ResistForce = 27,
    NraWeapon = 30,
    NraSlash = 31,
    NraThrust = 32,
    NraStrike = 33,
    NraGun = 34,
    NraFire = 35,
    NraIce = 36,
    NraElec = 37,
    NraForce = 38,
    NraMagic = 39,
}

impl CorrectTbl {
    pub const ALL: [CorrectTbl; 36] = [
        Self::Str,
        Self::Magic,
        Self::Vit,
        Self::Int,
        Self::Speed,
        Self::Luck,
        Self::HpMax,
        Self::MpMax,
        Self::Clsr,
        Self::Lngr,
        Self::Spell,
        Self::Support,
        Self::Pdef,
        Self::Mdef,
        Self::HpRegen,
        Self::MpRegen,
        Self::KnockbackResist,
        Self::CooldownTime,
        Self::ResistSlash,
        Self::ResistThrust,
        Self::ResistStrike,
        Self::ResistGun,
        Self::ResistFire,
        Self::ResistIce,
        Self::ResistElec,
        Self::ResistForce,
        Self::NraWeapon,
        Self::NraSlash,
        Self::NraThrust,
        Self::NraStrike,
        Self::NraGun,
        Self::NraFire,
        Self::NraIce,
        Self::NraElec,
        Self::NraForce,
        Self::NraMagic,
    ];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == raw)
    }

    /// The six stats adjusted before dependent stats are recomputed.
    pub fn is_base_stat(self) -> bool {
        matches!(
            self,
            Self::Str | Self::Magic | Self::Vit | Self::Int | Self::Speed | Self::Luck
        )
    }

    /// The affinity NRA range.
    pub fn is_nra(self) -> bool {
        (Self::NraWeapon as u8..=Self::NraMagic as u8).contains(&(self as u8))
    }
}

/// One adjustment entry from a definition's correct table.
///
/// `kind` 0 is a flat numeric add, 1 is a percentage (a value of 0 pins the
/// stat to zero), and for NRA slots the NRA index + 2 selects which of the
/// three chance maps the value applies to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CorrectTblEntry {
    pub id: CorrectTbl,
    pub kind: u8,
    pub value: i16,
}

impl CorrectTblEntry {
    pub fn numeric(id: CorrectTbl, value: i16) -> Self {
        Self { id, kind: 0, value }
    }

    pub fn percent(id: CorrectTbl, value: i16) -> Self {
        Self { id, kind: 1, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        for t in CorrectTbl::ALL {
            assert_eq!(CorrectTbl::from_raw(t as u8), Some(t));
        }
        assert_eq!(CorrectTbl::from_raw(19), None);
        assert_eq!(CorrectTbl::from_raw(200), None);
    }

    #[test]
    fn ranges() {
        assert!(CorrectTbl::Str.is_base_stat());
        assert!(!CorrectTbl::HpMax.is_base_stat());
        assert!(CorrectTbl::NraWeapon.is_nra());
        assert!(CorrectTbl::NraMagic.is_nra());
        assert!(!CorrectTbl::ResistFire.is_nra());
    }
}
