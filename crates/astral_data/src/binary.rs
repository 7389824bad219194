use anyhow::{bail, ensure, Context, Result};
use bytes::Buf;
use tracing::warn;

use crate::records::{
    AppliedStatus, DevilData, DevilGrowth, DurationType, DynamicMapData, ItemData,
    ShopProductData, SkillData, SpotData, StatusBasic, StatusCancel, StatusData, StatusTDamage,
    ZoneRelationData,
};
use crate::tables::{CorrectTbl, CorrectTblEntry};

/// A record kind stored in one of the fixed-layout binary tables.
pub trait TableRecord: Sized {
    const NAME: &'static str;

    fn decode(r: &mut &[u8]) -> Result<Self>;

    fn id(&self) -> u32;
}

/// The two-`u16` header every table file starts with.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TableHeader {
    pub entry_count: u16,
    pub table_count: u16,
}

pub fn read_header(r: &mut &[u8], tables_expected: u16) -> Result<TableHeader> {
    ensure!(r.remaining() >= 4, "table header truncated");

    let entry_count = r.get_u16_le();
    let table_count = r.get_u16_le();

    if tables_expected > 0 {
        ensure!(
            table_count == tables_expected,
            "expected {tables_expected} tables but encountered {table_count}"
        );
    }

    Ok(TableHeader {
        entry_count,
        table_count,
    })
}

/// Decodes a whole table file into its records, in file order.
pub fn load_records<T: TableRecord>(mut data: &[u8], tables_expected: u16) -> Result<Vec<T>> {
    let header = read_header(&mut data, tables_expected)
        .with_context(|| format!("bad header in {} table", T::NAME))?;

    let mut records = Vec::with_capacity(header.entry_count as usize);
    for i in 0..header.entry_count {
        let record = T::decode(&mut data)
            .with_context(|| format!("bad {} record at index {i}", T::NAME))?;
        records.push(record);
    }

    if data.has_remaining() {
        warn!(
            table = T::NAME,
            trailing = data.remaining(),
            "table file has trailing bytes"
        );
    }

    Ok(records)
}

fn ensure_remaining(r: &&[u8], n: usize, what: &str) -> Result<()> {
    ensure!(r.remaining() >= n, "truncated while reading {what}");
    Ok(())
}

fn read_string(r: &mut &[u8]) -> Result<String> {
    ensure_remaining(r, 2, "string length")?;
    let len = r.get_u16_le() as usize;
    ensure_remaining(r, len, "string bytes")?;

    let (head, tail) = r.split_at(len);
    let s = std::str::from_utf8(head).context("invalid UTF-8 in record string")?;
    *r = tail;
    Ok(s.to_owned())
}

/// Reads a correct-table list: `u16` count, then `(u8 id, u8 kind, i16
/// value)` triples. Entries with table IDs this build does not know are
/// skipped so newer content drops keep loading.
fn read_correct_tbl(r: &mut &[u8]) -> Result<Vec<CorrectTblEntry>> {
    ensure_remaining(r, 2, "correct table count")?;
    let count = r.get_u16_le() as usize;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        ensure_remaining(r, 4, "correct table entry")?;
        let raw_id = r.get_u8();
        let kind = r.get_u8();
        let value = r.get_i16_le();

        match CorrectTbl::from_raw(raw_id) {
            Some(id) => entries.push(CorrectTblEntry { id, kind, value }),
            None => warn!(raw_id, "skipping unknown correct table entry"),
        }
    }

    Ok(entries)
}

fn read_id_list(r: &mut &[u8]) -> Result<Vec<u32>> {
    ensure_remaining(r, 2, "ID list count")?;
    let count = r.get_u16_le() as usize;
    ensure_remaining(r, count * 4, "ID list")?;

    Ok((0..count).map(|_| r.get_u32_le()).collect())
}

impl TableRecord for ItemData {
    const NAME: &'static str = "item";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 4, "item ID")?;
        let id = r.get_u32_le();
        let name = read_string(r)?;

        ensure_remaining(r, 11, "item body")?;
        let raw_slot = r.get_u8();
        let equip_slot = (raw_slot != 0xFF).then_some(raw_slot);
        let stack_size = r.get_u16_le();
        let buy_price = r.get_u32_le();
        let sell_price = r.get_u32_le();

        let correct_tbl = read_correct_tbl(r)?;

        Ok(Self {
            id,
            name,
            equip_slot,
            stack_size,
            buy_price,
            sell_price,
            correct_tbl,
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for SkillData {
    const NAME: &'static str = "skill";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 4, "skill ID")?;
        let id = r.get_u32_le();
        let name = read_string(r)?;

        ensure_remaining(r, 9, "skill body")?;
        let main_category = r.get_u8();
        let hp_cost = r.get_u16_le();
        let mp_cost = r.get_u16_le();
        let cooldown_ms = r.get_u32_le();

        let correct_tbl = read_correct_tbl(r)?;

        ensure_remaining(r, 2, "skill status count")?;
        let status_count = r.get_u16_le() as usize;
        let mut applied_statuses = Vec::with_capacity(status_count);
        for _ in 0..status_count {
            ensure_remaining(r, 6, "skill status entry")?;
            applied_statuses.push(AppliedStatus {
                status_id: r.get_u32_le(),
                stack: r.get_u8(),
                is_replace: r.get_u8() != 0,
            });
        }

        Ok(Self {
            id,
            name,
            main_category,
            hp_cost,
            mp_cost,
            cooldown_ms,
            correct_tbl,
            applied_statuses,
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for DevilData {
    const NAME: &'static str = "devil";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 4, "devil ID")?;
        let id = r.get_u32_le();
        let name = read_string(r)?;

        ensure_remaining(r, 4, "devil body")?;
        let race_id = r.get_u8();
        let base_level = r.get_i8();
        let lnc = r.get_i16_le();

        let skills = read_id_list(r)?;
        let enemy_only_skills = read_id_list(r)?;

        ensure_remaining(r, 2, "devil battle correct count")?;
        let count = r.get_u16_le() as usize;
        let mut battle_correct = rustc_hash::FxHashMap::default();
        for _ in 0..count {
            ensure_remaining(r, 3, "devil battle correct entry")?;
            let raw_id = r.get_u8();
            let value = r.get_i16_le();
            battle_correct.insert(raw_id, value);
        }

        Ok(Self {
            id,
            name,
            race_id,
            base_level,
            lnc,
            growth: DevilGrowth {
                skills,
                enemy_only_skills,
            },
            battle_correct,
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for StatusData {
    const NAME: &'static str = "status";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 4, "status ID")?;
        let id = r.get_u32_le();

        ensure_remaining(r, 8, "status basic")?;
        let basic = StatusBasic {
            max_stack: r.get_u8(),
            group_id: r.get_u32_le(),
            group_rank: r.get_u8(),
            application_logic: r.get_u8(),
            stack_type: r.get_u8(),
        };

        ensure_remaining(r, 6, "status cancel")?;
        let raw_duration_type = r.get_u8();
        let Some(duration_type) = DurationType::from_raw(raw_duration_type) else {
            bail!("unknown duration type {raw_duration_type}");
        };
        let cancel = StatusCancel {
            duration_type,
            duration: r.get_u32_le(),
            cancel_types: r.get_u8(),
        };

        let correct_tbl = read_correct_tbl(r)?;

        ensure_remaining(r, 4, "status T-damage")?;
        let t_damage = StatusTDamage {
            hp_damage: r.get_i16_le(),
            mp_damage: r.get_i16_le(),
        };

        Ok(Self {
            id,
            basic,
            cancel,
            correct_tbl,
            t_damage,
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for ShopProductData {
    const NAME: &'static str = "shop product";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 18, "shop product")?;
        Ok(Self {
            id: r.get_u32_le(),
            item_id: r.get_u32_le(),
            stack: r.get_u16_le(),
            price: r.get_u32_le(),
            cp_cost: r.get_u32_le(),
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for ZoneRelationData {
    const NAME: &'static str = "zone relation";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 4, "zone relation ID")?;
        let id = r.get_u32_le();
        let connected_zone_ids = read_id_list(r)?;

        Ok(Self {
            id,
            connected_zone_ids,
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for DynamicMapData {
    const NAME: &'static str = "dynamic map";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 8, "dynamic map")?;
        let id = r.get_u32_le();
        let zone_id = r.get_u32_le();
        let spot_file = read_string(r)?;

        Ok(Self {
            id,
            zone_id,
            spot_file,
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

impl TableRecord for SpotData {
    const NAME: &'static str = "spot";

    fn decode(r: &mut &[u8]) -> Result<Self> {
        ensure_remaining(r, 21, "spot")?;
        Ok(Self {
            id: r.get_u32_le(),
            center_x: r.get_f32_le(),
            center_y: r.get_f32_le(),
            span_x: r.get_f32_le(),
            span_y: r.get_f32_le(),
            match_spawn: r.get_u8() != 0,
            // Server-side actions are merged in from zone definitions, not
            // stored in the client's spot table.
            enter_actions: Vec::new(),
            leave_actions: Vec::new(),
        })
    }

    fn id(&self) -> u32 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    fn put_string(buf: &mut Vec<u8>, s: &str) {
        buf.put_u16_le(s.len() as u16);
        buf.put_slice(s.as_bytes());
    }

    fn sample_item_table() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16_le(2); // entry count
        buf.put_u16_le(1); // table count

        for (id, name, slot) in [(10u32, "Talisman", 0x03u8), (11, "Bead", 0xFF)] {
            buf.put_u32_le(id);
            put_string(&mut buf, name);
            buf.put_u8(slot);
            buf.put_u16_le(50);
            buf.put_u32_le(120);
            buf.put_u32_le(60);
            buf.put_u16_le(1); // one correct table entry
            buf.put_u8(CorrectTbl::Str as u8);
            buf.put_u8(0);
            buf.put_i16_le(5);
        }

        buf
    }

    #[test]
    fn loads_item_table() {
        let data = sample_item_table();
        let items: Vec<ItemData> = load_records(&data, 1).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 10);
        assert_eq!(items[0].name, "Talisman");
        assert_eq!(items[0].equip_slot, Some(3));
        assert_eq!(items[1].equip_slot, None);
        assert_eq!(
            items[0].correct_tbl,
            vec![CorrectTblEntry::numeric(CorrectTbl::Str, 5)]
        );
    }

    #[test]
    fn rejects_wrong_table_count() {
        let data = sample_item_table();
        let err = load_records::<ItemData>(&data, 4).unwrap_err();
        assert!(err.to_string().contains("bad header"));
    }

    #[test]
    fn rejects_truncated_record() {
        let mut data = sample_item_table();
        data.truncate(data.len() - 3);
        assert!(load_records::<ItemData>(&data, 1).is_err());
    }

    #[test]
    fn status_record_round_trip() {
        let mut buf = Vec::new();
        buf.put_u16_le(1);
        buf.put_u16_le(2);

        buf.put_u32_le(100);
        // basic
        buf.put_u8(3); // max stack
        buf.put_u32_le(7); // group
        buf.put_u8(2); // rank
        buf.put_u8(2); // application logic
        buf.put_u8(1); // stack type
        // cancel
        buf.put_u8(3); // hour duration
        buf.put_u32_le(2);
        buf.put_u8(0x0C); // zoneout | death
        // correct table
        buf.put_u16_le(0);
        // t-damage
        buf.put_i16_le(15);
        buf.put_i16_le(0);

        let statuses: Vec<StatusData> = load_records(&buf, 2).unwrap();
        let s = &statuses[0];
        assert_eq!(s.id, 100);
        assert_eq!(s.basic.group_id, 7);
        assert_eq!(s.cancel.duration_type, DurationType::Hour);
        assert_eq!(s.t_damage.hp_damage, 15);
    }
}
