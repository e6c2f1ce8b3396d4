use super::Page;

const NEXT_TIMESTAMP_OFFSET: usize = 4;

/// View over the reserved page 0. Stores engine metadata that must survive
/// restarts, currently the next transaction timestamp.
pub struct MetadataPage<'a> {
    page: &'a mut Page,
}

impl<'a> MetadataPage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self { page }
    }

    pub fn next_transaction_timestamp(&self) -> u64 {
        u64::from_ne_bytes(
            self.page
                .read_bytes(NEXT_TIMESTAMP_OFFSET, NEXT_TIMESTAMP_OFFSET + 8)
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_next_transaction_timestamp(&mut self, timestamp: u64) {
        self.page.write_bytes(
            NEXT_TIMESTAMP_OFFSET,
            NEXT_TIMESTAMP_OFFSET + 8,
            &timestamp.to_ne_bytes(),
        );
    }
}
