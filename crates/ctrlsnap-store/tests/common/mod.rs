use ctrlsnap_core::model::{ImportProvenance, SnapshotHeader};
use ctrlsnap_core::parser::l5x::parse_l5x;
use ctrlsnap_core::ControllerProject;
use ctrlsnap_store::{ConnectionDescriptor, Database, ImportPlan};
use rusqlite::Connection;
use std::path::PathBuf;
use tempfile::TempDir;

pub const TEST_L5X: &[u8] = include_bytes!("../fixtures/Test.L5X");

/// A temp directory holding `plant.db`, plus the resolved database
#[allow(dead_code)]
pub struct TestDb {
    pub dir: TempDir,
    pub path: PathBuf,
    pub db: Database,
}

#[allow(dead_code)]
pub fn unbuilt_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plant.db");
    let db = Database::resolve(&ConnectionDescriptor::sqlite(path.display().to_string())).unwrap();
    TestDb { dir, path, db }
}

#[allow(dead_code)]
pub async fn built_db() -> TestDb {
    let test_db = unbuilt_db();
    test_db.db.build().await.unwrap();
    test_db
}

#[allow(dead_code)]
pub fn provenance() -> ImportProvenance {
    ImportProvenance {
        user: "tester".into(),
        machine: "ci".into(),
    }
}

#[allow(dead_code)]
pub fn test_project() -> ControllerProject {
    parse_l5x(TEST_L5X).unwrap()
}

/// Plan an import of `bytes` (already parsed into `project`)
#[allow(dead_code)]
pub fn plan_for(project: &ControllerProject, bytes: &[u8]) -> ImportPlan {
    let header = SnapshotHeader::new(&project.export, bytes, &provenance(), false);
    ImportPlan::build(project, header).unwrap()
}

#[allow(dead_code)]
pub fn test_plan() -> ImportPlan {
    plan_for(&test_project(), TEST_L5X)
}

/// Direct read-only access for assertions
#[allow(dead_code)]
pub fn count(path: &PathBuf, sql: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}
