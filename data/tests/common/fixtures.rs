//! Legacy source stores, the current target schema and matching configuration

use chrono::{TimeZone, Utc};
use data::db::migration::config::DefaultEntry;
use data::db::{Clock, ForeignKeyRule, MigrationConfig, StoreConfig, open_read_write};
use std::path::Path;

/// Current club schema
pub const TARGET_SCHEMA: &str = "
CREATE TABLE accounts_user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username VARCHAR(150) NOT NULL UNIQUE,
    rfid_code VARCHAR(64) NOT NULL,
    is_staff BOOL NOT NULL,
    date_joined DATETIME NOT NULL,
    last_login DATETIME
);
CREATE TABLE members_member (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES accounts_user (id),
    phone VARCHAR(32) NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'pending',
    tier VARCHAR(16) NOT NULL DEFAULT 'basic',
    emergency_contact VARCHAR(64) NOT NULL,
    notes TEXT NOT NULL,
    joined_on DATE NOT NULL
);
CREATE TABLE subscriptions_plan (
    id INTEGER PRIMARY KEY,
    name VARCHAR(64) NOT NULL,
    price DECIMAL(8, 2) NOT NULL
);
CREATE TABLE subscriptions_subscription (
    id INTEGER PRIMARY KEY,
    member_id INTEGER NOT NULL REFERENCES members_member (id),
    plan_id INTEGER NOT NULL REFERENCES subscriptions_plan (id),
    starts_on DATE NOT NULL
);
CREATE TABLE devices_device (
    id INTEGER PRIMARY KEY,
    serial VARCHAR(32) NOT NULL UNIQUE,
    location VARCHAR(64)
);
CREATE TABLE django_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    applied DATETIME NOT NULL
);
";

/// Legacy store: `members` feeds `members_member` (with `mobile` renamed to
/// `phone`), one subscription points at member 42 which does not exist, user 3
/// has no RFID code and `legacy_notes` has no model in the current schema
pub const LEGACY_STORE: &str = "
CREATE TABLE accounts_user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT,
    rfid_code TEXT,
    is_staff INTEGER,
    date_joined TEXT
);
INSERT INTO accounts_user VALUES
    (1, 'ann', 'RF-0001', 1, '2023-01-05 10:00:00'),
    (2, 'bo', 'RF-0002', 0, '2023-02-11 18:30:00'),
    (3, 'cy', '', 0, '2023-03-20 07:15:00');
CREATE TABLE members (
    id INTEGER PRIMARY KEY,
    user_id INTEGER,
    mobile TEXT,
    notes TEXT,
    joined_on TEXT,
    fax TEXT
);
INSERT INTO members VALUES
    (1, 1, '555-0101', 'front desk', '2023-01-05', NULL),
    (2, 2, '555-0102', '', '2023-02-11', NULL),
    (3, 3, '555-0103', 'student', '2023-03-20', NULL);
CREATE TABLE subscriptions_plan (id INTEGER PRIMARY KEY, name TEXT, price REAL);
INSERT INTO subscriptions_plan VALUES (1, 'Monthly', 30.0), (2, 'Annual', 300.0);
CREATE TABLE subscriptions_subscription (
    id INTEGER PRIMARY KEY,
    member_id INTEGER,
    plan_id INTEGER,
    starts_on TEXT
);
INSERT INTO subscriptions_subscription VALUES
    (1, 1, 1, '2023-01-05'),
    (2, 2, 2, '2023-02-11'),
    (3, 42, 1, '2023-04-01'),
    (4, 3, 1, '2023-03-20');
CREATE TABLE devices_device (id INTEGER PRIMARY KEY, serial TEXT, location TEXT);
CREATE TABLE django_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    app TEXT,
    name TEXT,
    applied TEXT
);
INSERT INTO django_migrations (app, name, applied) VALUES
    ('accounts', '0001_initial', '2023-01-01 00:00:00'),
    ('members', '0001_initial', '2023-01-01 00:00:00');
CREATE TABLE legacy_notes (id INTEGER PRIMARY KEY, body TEXT);
INSERT INTO legacy_notes VALUES (1, 'paper forms'), (2, 'old locker list');
";

pub fn create_store(path: &Path, sql: &str) {
    let conn = open_read_write(path, &StoreConfig::default()).expect("Failed to open store");
    conn.execute_batch(sql).expect("Failed to build store");
}

/// `devices_device` with `count` rows; the rows listed in `null_serials` have
/// no serial number
pub fn create_device_store(path: &Path, count: i64, null_serials: &[i64]) {
    let mut conn = open_read_write(path, &StoreConfig::default()).expect("Failed to open store");
    let tx = conn.transaction().expect("Failed to begin");
    tx.execute_batch("CREATE TABLE devices_device (id INTEGER PRIMARY KEY, serial TEXT, location TEXT);")
        .expect("Failed to create table");
    {
        let mut stmt = tx
            .prepare("INSERT INTO devices_device (id, serial, location) VALUES (?1, ?2, ?3)")
            .expect("Failed to prepare");
        for id in 1..=count {
            let serial = (!null_serials.contains(&id)).then(|| format!("SN-{id:05}"));
            stmt.execute(rusqlite::params![id, serial, "front desk"])
                .expect("Failed to insert");
        }
    }
    tx.commit().expect("Failed to commit");
}

/// Configuration matching [`LEGACY_STORE`] and [`TARGET_SCHEMA`]
pub fn gym_config() -> MigrationConfig {
    let mut config = MigrationConfig::default()
        .with_foreign_keys("members_member", vec![ForeignKeyRule::new("user_id", "accounts_user")])
        .with_foreign_keys(
            "subscriptions_subscription",
            vec![
                ForeignKeyRule::new("member_id", "members_member"),
                ForeignKeyRule::new("plan_id", "subscriptions_plan"),
            ],
        )
        .with_default("member.status", DefaultEntry::Literal(serde_json::json!("active")));
    config
        .sources
        .insert("members_member".to_string(), "members".to_string());
    config
        .renames
        .insert("members_member.mobile".to_string(), "phone".to_string());
    config
        .entities
        .insert("members_member".to_string(), "member".to_string());
    config
}

/// Plan holding only `tables`, with nothing treated as divergent
pub fn only_tables(tables: &[&str]) -> MigrationConfig {
    let mut config = MigrationConfig::default().with_plan(tables.iter().map(|t| t.to_string()).collect());
    config.plan.divergent.clear();
    config
}

/// 2024-03-01 09:30:00 UTC
pub fn run_clock() -> Clock {
    Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap())
}
