use crate::common::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Fixed-width name field followed by the root page id
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn padded_name(name: &str) -> Option<[u8; NAME_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > NAME_SIZE {
        return None;
    }
    let mut field = [0u8; NAME_SIZE];
    field[..bytes.len()].copy_from_slice(bytes);
    Some(field)
}

/// Mutable view over the header page (page 0): a record store mapping
/// index names to their root page ids. Every index writes its root here
/// after a structural change at the root.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
    }

    fn as_view(&self) -> HeaderPageRef<'_> {
        HeaderPageRef::new(self.data)
    }

    pub fn record_count(&self) -> usize {
        self.as_view().record_count()
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.as_view().get_root_id(name)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, slot: usize, name_field: &[u8; NAME_SIZE], root: PageId) {
        let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].copy_from_slice(name_field);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root.as_u32().to_le_bytes());
    }

    /// Adds a record. Returns false when the name is already present,
    /// unrepresentable, or the page is out of slots.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        let Some(field) = padded_name(name) else {
            return false;
        };
        if self.as_view().find_record(&field).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_RECORDS {
            return false;
        }
        self.write_record(count, &field, root);
        self.set_record_count(count + 1);
        true
    }

    /// Overwrites an existing record's root page id. Returns false when
    /// the name is absent.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        let Some(field) = padded_name(name) else {
            return false;
        };
        let Some(slot) = self.as_view().find_record(&field) else {
            return false;
        };
        self.write_record(slot, &field, root);
        true
    }
}

/// Read-only view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    fn find_record(&self, name_field: &[u8; NAME_SIZE]) -> Option<usize> {
        (0..self.record_count()).find(|&slot| {
            let offset = RECORDS_OFFSET + slot * RECORD_SIZE;
            &self.data[offset..offset + NAME_SIZE] == name_field
        })
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let field = padded_name(name)?;
        let slot = self.find_record(&field)?;
        let offset = RECORDS_OFFSET + slot * RECORD_SIZE + NAME_SIZE;
        Some(PageId::new(u32::from_le_bytes(
            self.data[offset..offset + 4].try_into().unwrap(),
        )))
    }
}
