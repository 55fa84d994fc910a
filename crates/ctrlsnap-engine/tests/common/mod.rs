use ctrlsnap_core::model::{ImportProvenance, SourceDescriptor};
use ctrlsnap_core::parser::DefaultParser;
use ctrlsnap_engine::{IngestEngine, IngestOptions};
use ctrlsnap_store::{ConnectionDescriptor, Database, ImportOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Temp workspace: a built SQLite database plus an inbox for source files
#[allow(dead_code)]
pub struct TestEnv {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub inbox: PathBuf,
    pub database: Database,
}

#[allow(dead_code)]
pub async fn setup_test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("plant.db");
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    let database =
        Database::resolve(&ConnectionDescriptor::sqlite(db_path.display().to_string())).unwrap();
    database.build().await.unwrap();
    TestEnv {
        dir,
        db_path,
        inbox,
        database,
    }
}

#[allow(dead_code)]
pub fn options(import: ImportOptions) -> IngestOptions {
    IngestOptions {
        import,
        provenance: ImportProvenance {
            user: "svc_ingest".into(),
            machine: "ingest-01".into(),
        },
        store_source_data: false,
    }
}

#[allow(dead_code)]
pub fn engine(env: &TestEnv, import: ImportOptions) -> Arc<IngestEngine> {
    Arc::new(IngestEngine::new(
        env.database.clone(),
        Arc::new(DefaultParser),
        options(import),
    ))
}

/// Minimal L5X export of one controller with controller-scoped `tags`
#[allow(dead_code)]
pub fn l5x(controller: &str, tags: &[&str]) -> String {
    let tags: String = tags
        .iter()
        .map(|t| format!(r#"<Tag Name="{}" TagType="Base" DataType="DINT"/>"#, t))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<RSLogix5000Content SchemaRevision="1.0" SoftwareRevision="33.01" TargetName="{c}" TargetType="Controller" ContainsContext="false">
<Controller Use="Target" Name="{c}" ProcessorType="1756-L83E" MajorRev="33" MinorRev="1">
<Tags>{tags}</Tags>
</Controller>
</RSLogix5000Content>"#,
        c = controller,
        tags = tags
    )
}

/// Write `content` into the inbox and describe it as an uploaded source
#[allow(dead_code)]
pub fn write_source(inbox: &Path, file_name: &str, content: &[u8]) -> SourceDescriptor {
    let path = inbox.join(format!("{}-{}", unique_prefix(), file_name));
    std::fs::write(&path, content).unwrap();
    SourceDescriptor::new(file_name, path, HashMap::new()).unwrap()
}

fn unique_prefix() -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!("src{}", NEXT.fetch_add(1, Ordering::SeqCst))
}

#[allow(dead_code)]
pub fn count(path: &Path, sql: &str) -> i64 {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[allow(dead_code)]
pub fn query_string(path: &Path, sql: &str) -> String {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}
