use crate::common::types::{PageId, RecordId, TransactionId};
use crate::storage::page::PageError;
use crate::storage::tuple::{Tuple, TupleDesc};

/// A resident heap page: a slot-occupancy bitmap followed by fixed-size tuple
/// slots. With `ts = tuple byte size`, a page of `page_size` bytes holds
/// `floor(page_size * 8 / (ts * 8 + 1))` slots, each slot costing one header
/// bit plus `ts` bytes.
///
/// The dirty mark and fix count live on the page itself; both are managed by
/// the page cache, never by operators directly.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: TupleDesc,
    page_size: usize,
    slots: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
    fix_count: u32,
}

impl HeapPage {
    /// Number of tuple slots for a given page size and schema.
    pub fn slots_per_page(page_size: usize, desc: &TupleDesc) -> usize {
        (page_size * 8) / (desc.byte_size() * 8 + 1)
    }

    fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// A fresh, empty page.
    pub fn empty(pid: PageId, desc: TupleDesc, page_size: usize) -> Self {
        let num_slots = Self::slots_per_page(page_size, &desc);
        Self {
            pid,
            desc,
            page_size,
            slots: vec![None; num_slots],
            dirty: None,
            fix_count: 0,
        }
    }

    /// Decode a page from its on-disk bytes. Vacant slots decode to `None`;
    /// occupied slots get record ids pointing back at this page.
    pub fn from_bytes(
        pid: PageId,
        desc: TupleDesc,
        page_size: usize,
        data: &[u8],
    ) -> Result<Self, PageError> {
        if data.len() != page_size {
            return Err(PageError::BadPageSize { expected: page_size, actual: data.len() });
        }
        let num_slots = Self::slots_per_page(page_size, &desc);
        let header_size = Self::header_size(num_slots);
        let tuple_size = desc.byte_size();

        let mut slots = Vec::with_capacity(num_slots);
        for i in 0..num_slots {
            let occupied = data[i / 8] & (1 << (i % 8)) != 0;
            if occupied {
                let start = header_size + i * tuple_size;
                let mut tuple = Tuple::read_from(&desc, &data[start..start + tuple_size])?;
                tuple.set_record_id(Some(RecordId::new(pid, i)));
                slots.push(Some(tuple));
            } else {
                slots.push(None);
            }
        }
        Ok(Self { pid, desc, page_size, slots, dirty: None, fix_count: 0 })
    }

    /// Encode this page into exactly `page_size` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let num_slots = self.slots.len();
        let header_size = Self::header_size(num_slots);
        let tuple_size = self.desc.byte_size();
        let mut data = vec![0u8; self.page_size];

        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(tuple) = slot {
                data[i / 8] |= 1 << (i % 8);
                let start = header_size + i * tuple_size;
                tuple.write_to(&mut data[start..start + tuple_size]);
            }
        }
        data
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Insert a tuple into the first vacant slot, stamping its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<RecordId, PageError> {
        if tuple.desc() != &self.desc {
            return Err(PageError::SchemaMismatch);
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(PageError::PageFull)?;
        let rid = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(rid));
        self.slots[slot] = Some(tuple.clone());
        Ok(rid)
    }

    /// Remove the tuple in the given slot.
    pub fn delete_tuple(&mut self, rid: RecordId) -> Result<(), PageError> {
        if rid.slot >= self.slots.len() {
            return Err(PageError::SlotOutOfRange(rid.slot));
        }
        if self.slots[rid.slot].is_none() {
            return Err(PageError::SlotVacant(rid.slot));
        }
        self.slots[rid.slot] = None;
        Ok(())
    }

    /// Occupied tuples in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// The transaction that last dirtied this page, if any.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirty
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirty = tid;
    }

    pub fn fix_count(&self) -> u32 {
        self.fix_count
    }

    pub fn set_fix_count(&mut self, n: u32) {
        self.fix_count = n;
    }

    pub fn inc_fix_count(&mut self) {
        self.fix_count += 1;
    }

    pub fn release_fixes(&mut self, n: u32) {
        self.fix_count = self.fix_count.saturating_sub(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tuple::{Field, FieldType};

    fn small_page() -> HeapPage {
        // 8-byte Int tuples on a 128-byte page: 15 slots, 2 header bytes.
        HeapPage::empty(PageId::new(7, 0), TupleDesc::ints(1), 128)
    }

    #[test]
    fn test_slot_arithmetic() {
        let desc = TupleDesc::ints(1);
        assert_eq!(HeapPage::slots_per_page(128, &desc), 15);
        assert_eq!(HeapPage::slots_per_page(4096, &desc), 504);
        let wide = TupleDesc::new(vec![FieldType::Int, FieldType::Text]);
        assert_eq!(HeapPage::slots_per_page(4096, &wide), 93);
    }

    #[test]
    fn test_insert_delete_roundtrip() {
        let mut page = small_page();
        let free = page.free_slots();

        let mut t = Tuple::from_ints(&[99]);
        let rid = page.insert_tuple(&mut t).unwrap();
        assert_eq!(rid.page_id, page.id());
        assert_eq!(t.record_id(), Some(rid));
        assert_eq!(page.free_slots(), free - 1);

        let bytes = page.to_bytes();
        let decoded =
            HeapPage::from_bytes(page.id(), TupleDesc::ints(1), 128, &bytes).unwrap();
        let stored: Vec<_> = decoded.tuples().collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].field(0), &Field::Int(99));
        assert_eq!(stored[0].record_id(), Some(rid));

        page.delete_tuple(rid).unwrap();
        assert_eq!(page.free_slots(), free);
        assert!(matches!(page.delete_tuple(rid), Err(PageError::SlotVacant(_))));
    }

    #[test]
    fn test_page_full() {
        let mut page = small_page();
        for i in 0..page.num_slots() {
            page.insert_tuple(&mut Tuple::from_ints(&[i as i64])).unwrap();
        }
        assert!(matches!(
            page.insert_tuple(&mut Tuple::from_ints(&[0])),
            Err(PageError::PageFull)
        ));
    }
}
