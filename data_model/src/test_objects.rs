pub mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};

    use super::super::{FileId, FileKind, RoomsPayload, StoredFile, StoredFileBuilder};

    pub const TEST_ORIGINAL_NAME: &str = "plan.dwg";

    pub fn mock_stored_file(id: &str, kind: FileKind) -> StoredFile {
        StoredFileBuilder::default()
            .id(FileId::from(id))
            .original_name(TEST_ORIGINAL_NAME)
            .mime_type("application/acad")
            .ext(".dwg")
            .size_bytes(4)
            .local_path(PathBuf::from(format!("/tmp/uploads/{}.dwg", id)))
            .created_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .kind(kind)
            .build()
            .unwrap()
    }

    pub fn mock_stored_file_at(id: &str, kind: FileKind, local_path: PathBuf) -> StoredFile {
        let mut file = mock_stored_file(id, kind);
        file.local_path = local_path;
        file
    }

    pub fn mock_rooms_payload(file_id: &str) -> RoomsPayload {
        RoomsPayload {
            file_id: file_id.to_string(),
            rooms: vec![],
        }
    }
}
