//! Feeds arbitrary text into a `CHECK(...)` clause and runs schema
//! inspection over it. The inspector hand-parses `CHECK` bodies out of
//! `sqlite_master.sql` with a parenthesis-depth scanner; this exercises
//! that scanner against adversarial nesting and quoting without expecting
//! the resulting DDL to even be valid.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rusqlite::Connection;

fuzz_target!(|data: &[u8]| {
    let Ok(clause) = std::str::from_utf8(data) else {
        return;
    };
    if clause.contains('\0') {
        return;
    }

    let conn = Connection::open_in_memory().unwrap();
    let ddl = format!("CREATE TABLE t (a INTEGER CHECK ({clause}))");
    if conn.execute_batch(&ddl).is_err() {
        return;
    }

    let _ = persist_lite::inspector::inspect(&conn, None);
});
