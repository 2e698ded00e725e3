pub mod tests {
    use crate::{ShareEntry, ShareEntryBuilder, ShareId};

    pub const TEST_CONTENT_TYPE: &str = "text/plain";

    pub fn mock_share_entry(filename: &str) -> ShareEntry {
        let share_id = ShareId::generate();
        ShareEntryBuilder::default()
            .storage_path(format!("uploads/{}_{}", share_id, filename))
            .share_id(share_id)
            .original_filename(filename.to_string())
            .public_url(Some(format!("https://cdn.example.com/{}", filename)))
            .content_type(TEST_CONTENT_TYPE.to_string())
            .size_bytes(42)
            .build()
            .expect("mock share entry is complete")
    }
}
