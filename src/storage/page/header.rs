use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::page::Page;

// Layout of the header page (page 0):
// - record_count: u32 (4 bytes)
// - records: { name_len: u16, name bytes, root_page_id: i32 }*
const COUNT_SIZE: usize = 4;
const NAME_LEN_SIZE: usize = 2;
const ROOT_ID_SIZE: usize = 4;

/// Decoded view of the header page: the `index_name -> root_page_id`
/// records that let an index be reopened by name.
#[derive(Debug, Default)]
pub struct HeaderRecords {
    entries: Vec<(String, PageId)>,
}

impl HeaderRecords {
    /// Decode the record list from the header page buffer. A zeroed page
    /// (fresh database file) decodes as an empty record list.
    pub fn from_page(page: &Page) -> Result<Self, PageError> {
        let count = LittleEndian::read_u32(&page.data[0..COUNT_SIZE]) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut offset = COUNT_SIZE;

        for _ in 0..count {
            if offset + NAME_LEN_SIZE > PAGE_SIZE {
                return Err(PageError::Corrupted("record past end of page".to_string()));
            }
            let name_len = LittleEndian::read_u16(&page.data[offset..offset + NAME_LEN_SIZE]) as usize;
            offset += NAME_LEN_SIZE;

            if offset + name_len + ROOT_ID_SIZE > PAGE_SIZE {
                return Err(PageError::Corrupted("record past end of page".to_string()));
            }
            let name = std::str::from_utf8(&page.data[offset..offset + name_len])
                .map_err(|_| PageError::Corrupted("record name is not utf-8".to_string()))?
                .to_string();
            offset += name_len;

            let root_page_id = LittleEndian::read_i32(&page.data[offset..offset + ROOT_ID_SIZE]);
            offset += ROOT_ID_SIZE;

            entries.push((name, root_page_id));
        }

        Ok(Self { entries })
    }

    /// Encode the record list back into the header page buffer.
    pub fn write_to(&self, page: &mut Page) -> Result<(), PageError> {
        let needed: usize = COUNT_SIZE
            + self
                .entries
                .iter()
                .map(|(name, _)| NAME_LEN_SIZE + name.len() + ROOT_ID_SIZE)
                .sum::<usize>();
        if needed > PAGE_SIZE {
            return Err(PageError::InsufficientSpace);
        }

        page.data.fill(0);
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], self.entries.len() as u32);
        let mut offset = COUNT_SIZE;

        for (name, root_page_id) in &self.entries {
            LittleEndian::write_u16(
                &mut page.data[offset..offset + NAME_LEN_SIZE],
                name.len() as u16,
            );
            offset += NAME_LEN_SIZE;

            page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
            offset += name.len();

            LittleEndian::write_i32(&mut page.data[offset..offset + ROOT_ID_SIZE], *root_page_id);
            offset += ROOT_ID_SIZE;
        }

        Ok(())
    }

    /// Insert a new record. Fails if the name is already present.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<(), PageError> {
        if self.entries.iter().any(|(n, _)| n == name) {
            return Err(PageError::Corrupted(format!(
                "duplicate header record for index {}",
                name
            )));
        }
        self.entries.push((name.to_string(), root_page_id));
        Ok(())
    }

    /// Update an existing record in place.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> Result<(), PageError> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => {
                entry.1 = root_page_id;
                Ok(())
            }
            None => Err(PageError::RecordNotFound),
        }
    }

    /// Insert the record if missing, otherwise update it.
    pub fn upsert_record(&mut self, name: &str, root_page_id: PageId) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = root_page_id,
            None => self.entries.push((name.to_string(), root_page_id)),
        }
    }

    /// Remove a record by name.
    pub fn delete_record(&mut self, name: &str) -> Result<(), PageError> {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        if self.entries.len() == before {
            return Err(PageError::RecordNotFound);
        }
        Ok(())
    }

    /// Look up the root page id recorded for an index.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, root)| *root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_empty_page_decodes_to_no_records() {
        let page = Page::new();
        let records = HeaderRecords::from_page(&page).unwrap();
        assert_eq!(records.get_root_id("missing"), None);
    }

    #[test]
    fn test_roundtrip_records() {
        let mut records = HeaderRecords::default();
        records.insert_record("orders_pk", 3).unwrap();
        records.insert_record("orders_date_idx", 9).unwrap();

        let mut page = Page::new();
        records.write_to(&mut page).unwrap();

        let decoded = HeaderRecords::from_page(&page).unwrap();
        assert_eq!(decoded.get_root_id("orders_pk"), Some(3));
        assert_eq!(decoded.get_root_id("orders_date_idx"), Some(9));
        assert_eq!(decoded.get_root_id("other"), None);
    }

    #[test]
    fn test_update_and_delete() {
        let mut records = HeaderRecords::default();
        records.insert_record("t_pk", 5).unwrap();

        records.update_record("t_pk", INVALID_PAGE_ID).unwrap();
        assert_eq!(records.get_root_id("t_pk"), Some(INVALID_PAGE_ID));

        assert!(records.update_record("absent", 1).is_err());

        records.delete_record("t_pk").unwrap();
        assert_eq!(records.get_root_id("t_pk"), None);
        assert!(records.delete_record("t_pk").is_err());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut records = HeaderRecords::default();
        records.insert_record("idx", 1).unwrap();
        assert!(records.insert_record("idx", 2).is_err());
    }
}
