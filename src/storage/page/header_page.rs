use crate::common::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of index records the header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View over the well-known header page (page 0), which maps index
/// names to their root page ids.
///
/// Layout: record count (u32), then fixed-width records of a NUL-padded
/// 32-byte name followed by the root page id (u32). Names longer than
/// 32 bytes are truncated.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    fn record_count(&self) -> usize {
        let bytes: [u8; 4] = self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        &self.data[offset..offset + NAME_SIZE]
    }

    fn root_at(&self, index: usize) -> PageId {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
        PageId::new(u32::from_le_bytes(bytes))
    }

    fn set_record(&mut self, index: usize, name: &str, root: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let mut padded = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        padded[..len].copy_from_slice(&bytes[..len]);
        self.data[offset..offset + NAME_SIZE].copy_from_slice(&padded);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root.as_u32().to_le_bytes());
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        let mut padded = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        padded[..len].copy_from_slice(&bytes[..len]);
        (0..self.record_count()).find(|&i| self.name_at(i) == padded)
    }

    /// Adds a record for `name`. Returns false if the name is already
    /// recorded or the page is full.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        if self.find_index(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }
        self.set_record(count, name, root);
        self.set_record_count(count + 1);
        true
    }

    /// Rewrites the root page id recorded for `name`. Returns false if
    /// the name is not recorded.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.find_index(name) {
            Some(index) => {
                self.set_record(index, name, root);
                true
            }
            None => false,
        }
    }

    /// Looks up the root page id recorded for `name`.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        self.find_index(name).map(|i| self.root_at(i))
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

    fn record_count(&self) -> usize {
        let bytes: [u8; 4] = self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes) as usize
    }

    /// Looks up the root page id recorded for `name`.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let mut padded = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        padded[..len].copy_from_slice(&bytes[..len]);

        (0..self.record_count()).find_map(|i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE;
            if &self.data[offset..offset + NAME_SIZE] == padded {
                let root: [u8; 4] = self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
                    .try_into()
                    .unwrap();
                Some(PageId::new(u32::from_le_bytes(root)))
            } else {
                None
            }
        })
    }
}
