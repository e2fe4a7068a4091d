//! End-to-end SQL scenarios driven through the public `Database` facade.

use minidb::{Config, Database, Value};
use tempfile::tempdir;

fn open_db(dir: &std::path::Path) -> Database {
    Database::open(Config {
        data_dir: dir.to_path_buf(),
        ..Config::default()
    })
    .unwrap()
}

fn seed_employees(db: &Database) {
    db.execute_sql(
        "CREATE TABLE employees(id INT, name VARCHAR(20), dept VARCHAR(20), \
         salary INT, age INT);",
    )
    .unwrap();
    for row in [
        "(1, 'Alice', 'Eng', 75000, 25)",
        "(2, 'Bob', 'Sales', 65000, 30)",
        "(3, 'Charlie', 'Eng', 80000, 28)",
        "(4, 'Diana', 'Sales', 70000, 26)",
        "(5, 'Eve', 'Eng', 85000, 30)",
    ] {
        db.execute_sql(&format!("INSERT INTO employees VALUES{row};"))
            .unwrap();
    }
}

fn int(v: &Value) -> i32 {
    match v {
        Value::Int(i) => *i,
        other => panic!("expected INT, got {other:?}"),
    }
}

fn text(v: &Value) -> &str {
    match v {
        Value::Str(s) => s,
        other => panic!("expected VARCHAR, got {other:?}"),
    }
}

#[test]
fn create_insert_seq_scan_round_trip() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    db.execute_sql("CREATE TABLE students(id INT, name VARCHAR(30));")
        .unwrap();
    db.execute_sql("INSERT INTO students VALUES(1,'Alice');")
        .unwrap();
    db.execute_sql("INSERT INTO students VALUES(2,'Bob');")
        .unwrap();

    let rows = db.execute_sql("SELECT * FROM students;").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(int(&rows[0]["id"]), 1);
    assert_eq!(text(&rows[0]["name"]), "Alice");
    assert_eq!(int(&rows[1]["id"]), 2);
    assert_eq!(text(&rows[1]["name"]), "Bob");
}

#[test]
fn filter_project_order_limit() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    seed_employees(&db);

    let rows = db
        .execute_sql(
            "SELECT name, salary FROM employees WHERE age > 25 \
             ORDER BY salary DESC LIMIT 2;",
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(text(&rows[0]["name"]), "Eve");
    assert_eq!(int(&rows[0]["salary"]), 85000);
    assert_eq!(text(&rows[1]["name"]), "Charlie");
    assert_eq!(int(&rows[1]["salary"]), 80000);
    // projection keeps exactly the requested columns
    let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["name", "salary"]);
}

#[test]
fn group_by_having() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    seed_employees(&db);

    let rows = db
        .execute_sql(
            "SELECT dept, COUNT(*) AS cnt, AVG(salary) AS avg_sal FROM employees \
             GROUP BY dept HAVING COUNT(*) >= 2;",
        )
        .unwrap();
    assert_eq!(rows.len(), 2);

    let mut by_dept: Vec<(&str, i32, f64)> = rows
        .iter()
        .map(|r| {
            let avg = match &r["avg_sal"] {
                Value::Float(f) => *f,
                other => panic!("expected FLOAT, got {other:?}"),
            };
            (text(&r["dept"]), int(&r["cnt"]), avg)
        })
        .collect();
    by_dept.sort_by(|a, b| a.0.cmp(b.0));
    assert_eq!(by_dept[0], ("Eng", 3, 80000.0));
    assert_eq!(by_dept[1], ("Sales", 2, 67500.0));
}

#[test]
fn distinct_keeps_first_occurrence_order() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    db.execute_sql("CREATE TABLE t(x INT, y INT);").unwrap();
    for row in ["(1,1)", "(1,1)", "(2,2)", "(1,1)", "(2,3)"] {
        db.execute_sql(&format!("INSERT INTO t VALUES{row};"))
            .unwrap();
    }

    let rows = db.execute_sql("SELECT DISTINCT x, y FROM t;").unwrap();
    let pairs: Vec<(i32, i32)> = rows
        .iter()
        .map(|r| (int(&r["x"]), int(&r["y"])))
        .collect();
    assert_eq!(pairs, vec![(1, 1), (2, 2), (2, 3)]);
}

#[test]
fn foreign_key_restrict_blocks_delete() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    db.execute_sql("CREATE TABLE parents(id INT PRIMARY KEY);")
        .unwrap();
    db.execute_sql(
        "CREATE TABLE children(id INT, parent_id INT, \
         FOREIGN KEY(parent_id) REFERENCES parents(id));",
    )
    .unwrap();
    db.execute_sql("INSERT INTO parents VALUES(1);").unwrap();
    db.execute_sql("INSERT INTO children VALUES(10, 1);")
        .unwrap();

    let err = db
        .execute_sql("DELETE FROM parents WHERE id = 1;")
        .unwrap_err();
    assert!(err.to_string().contains("foreign key"), "{err}");

    // both tables unchanged
    assert_eq!(db.execute_sql("SELECT * FROM parents;").unwrap().len(), 1);
    assert_eq!(db.execute_sql("SELECT * FROM children;").unwrap().len(), 1);

    // inserting an orphan child is rejected too
    assert!(db.execute_sql("INSERT INTO children VALUES(11, 99);").is_err());

    // removing the child first unblocks the parent delete
    db.execute_sql("DELETE FROM children WHERE id = 10;")
        .unwrap();
    db.execute_sql("DELETE FROM parents WHERE id = 1;").unwrap();
    assert!(db.execute_sql("SELECT * FROM parents;").unwrap().is_empty());
}

#[test]
fn left_join_with_no_match() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    db.execute_sql("CREATE TABLE a(id INT);").unwrap();
    db.execute_sql("CREATE TABLE b(aid INT, tag VARCHAR(4));")
        .unwrap();
    for row in ["(1)", "(2)", "(3)"] {
        db.execute_sql(&format!("INSERT INTO a VALUES{row};"))
            .unwrap();
    }
    db.execute_sql("INSERT INTO b VALUES(1, 'x');").unwrap();
    db.execute_sql("INSERT INTO b VALUES(3, 'y');").unwrap();

    let rows = db
        .execute_sql(
            "SELECT a.id, b.tag FROM a LEFT JOIN b ON a.id = b.aid ORDER BY a.id ASC;",
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(int(&rows[0]["a.id"]), 1);
    assert_eq!(text(&rows[0]["b.tag"]), "x");
    assert_eq!(int(&rows[1]["a.id"]), 2);
    assert_eq!(rows[1]["b.tag"], Value::Null);
    assert_eq!(int(&rows[2]["a.id"]), 3);
    assert_eq!(text(&rows[2]["b.tag"]), "y");
}

#[test]
fn update_and_delete_with_predicates() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    seed_employees(&db);

    let status = db
        .execute_sql("UPDATE employees SET salary = 90000 WHERE dept = 'Eng';")
        .unwrap();
    assert_eq!(int(&status[0]["affected_rows"]), 3);

    let rows = db
        .execute_sql("SELECT name FROM employees WHERE salary = 90000;")
        .unwrap();
    assert_eq!(rows.len(), 3);

    let status = db
        .execute_sql("DELETE FROM employees WHERE age >= 30;")
        .unwrap();
    assert_eq!(int(&status[0]["affected_rows"]), 2);
    assert_eq!(
        db.execute_sql("SELECT * FROM employees;").unwrap().len(),
        3
    );
}

#[test]
fn predicates_like_in_between_null() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE users(id INT, name VARCHAR(20), email VARCHAR(40));")
        .unwrap();
    db.execute_sql("INSERT INTO users VALUES(1, 'Alice', 'a@x.io');")
        .unwrap();
    db.execute_sql("INSERT INTO users VALUES(2, 'Anna', NULL);")
        .unwrap();
    db.execute_sql("INSERT INTO users VALUES(3, 'Bob', 'b@x.io');")
        .unwrap();

    let rows = db
        .execute_sql("SELECT name FROM users WHERE name LIKE 'A%';")
        .unwrap();
    assert_eq!(rows.len(), 2);

    let rows = db
        .execute_sql("SELECT name FROM users WHERE id IN (1, 3);")
        .unwrap();
    assert_eq!(rows.len(), 2);

    let rows = db
        .execute_sql("SELECT name FROM users WHERE id BETWEEN 2 AND 3;")
        .unwrap();
    assert_eq!(rows.len(), 2);

    let rows = db
        .execute_sql("SELECT name FROM users WHERE email IS NULL;")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(text(&rows[0]["name"]), "Anna");

    let rows = db
        .execute_sql("SELECT name FROM users WHERE email IS NOT NULL AND NOT (id = 1);")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(text(&rows[0]["name"]), "Bob");
}

#[test]
fn in_subquery() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE users(id INT, age INT);").unwrap();
    db.execute_sql("CREATE TABLE orders(oid INT, uid INT);")
        .unwrap();
    for row in ["(1, 40)", "(2, 20)", "(3, 35)"] {
        db.execute_sql(&format!("INSERT INTO users VALUES{row};"))
            .unwrap();
    }
    for row in ["(100, 1)", "(101, 2)", "(102, 3)"] {
        db.execute_sql(&format!("INSERT INTO orders VALUES{row};"))
            .unwrap();
    }

    let rows = db
        .execute_sql(
            "SELECT oid FROM orders WHERE uid IN (SELECT id FROM users WHERE age > 30);",
        )
        .unwrap();
    let oids: Vec<i32> = rows.iter().map(|r| int(&r["oid"])).collect();
    assert_eq!(oids, vec![100, 102]);
}

#[test]
fn alter_table_all_actions() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE t(id INT, name VARCHAR(10));")
        .unwrap();
    db.execute_sql("INSERT INTO t VALUES(1, 'a');").unwrap();
    db.execute_sql("INSERT INTO t VALUES(2, 'b');").unwrap();

    db.execute_sql("ALTER TABLE t ADD COLUMN score INT;").unwrap();
    let rows = db.execute_sql("SELECT * FROM t;").unwrap();
    assert_eq!(rows[0]["score"], Value::Null);

    db.execute_sql("ALTER TABLE t MODIFY score VARCHAR(8);")
        .unwrap();
    db.execute_sql("ALTER TABLE t CHANGE name label VARCHAR(12);")
        .unwrap();
    let rows = db.execute_sql("SELECT label FROM t;").unwrap();
    assert_eq!(text(&rows[0]["label"]), "a");

    db.execute_sql("ALTER TABLE t DROP COLUMN score;").unwrap();
    let rows = db.execute_sql("SELECT * FROM t;").unwrap();
    assert!(rows[0].get("score").is_none());
    assert_eq!(rows.len(), 2);

    db.execute_sql("ALTER TABLE t RENAME TO s;").unwrap();
    assert!(db.execute_sql("SELECT * FROM t;").is_err());
    assert_eq!(db.execute_sql("SELECT * FROM s;").unwrap().len(), 2);
}

#[test]
fn show_tables_and_desc() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE alpha(id INT);").unwrap();
    db.execute_sql("CREATE TABLE beta(id INT, label VARCHAR(16));")
        .unwrap();

    let rows = db.execute_sql("SHOW TABLES;").unwrap();
    let names: Vec<&str> = rows.iter().map(|r| text(&r["table"])).collect();
    // system tables are excluded
    assert_eq!(names, vec!["alpha", "beta"]);

    let rows = db.execute_sql("DESC beta;").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(text(&rows[0]["Field"]), "id");
    assert_eq!(text(&rows[0]["Type"]), "INT");
    assert_eq!(text(&rows[1]["Type"]), "VARCHAR(16)");
    assert_eq!(int(&rows[1]["Position"]), 1);
}

#[test]
fn constraints_not_null_unique_default() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql(
        "CREATE TABLE accounts(id INT PRIMARY KEY, email VARCHAR(40) UNIQUE, \
         score INT DEFAULT 10, note VARCHAR(20));",
    )
    .unwrap();

    db.execute_sql("INSERT INTO accounts VALUES(1, 'a@x.io', 5, NULL);")
        .unwrap();
    // primary key duplicate
    let err = db
        .execute_sql("INSERT INTO accounts VALUES(1, 'b@x.io', 6, NULL);")
        .unwrap_err();
    assert!(err.to_string().contains("primary key"), "{err}");
    // unique duplicate
    let err = db
        .execute_sql("INSERT INTO accounts VALUES(2, 'a@x.io', 6, NULL);")
        .unwrap_err();
    assert!(err.to_string().contains("unique"), "{err}");

    // DEFAULT fills unspecified columns
    db.execute_sql("INSERT INTO accounts(id, email) VALUES(3, 'c@x.io');")
        .unwrap();
    let rows = db
        .execute_sql("SELECT score FROM accounts WHERE id = 3;")
        .unwrap();
    assert_eq!(int(&rows[0]["score"]), 10);
}

#[test]
fn persistence_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = open_db(dir.path());
        db.execute_sql("CREATE TABLE t(id INT, name VARCHAR(10));")
            .unwrap();
        db.execute_sql("INSERT INTO t VALUES(1, 'kept');").unwrap();
        db.close().unwrap();
    }
    {
        let db = open_db(dir.path());
        let rows = db.execute_sql("SELECT * FROM t;").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(text(&rows[0]["name"]), "kept");
        // catalog survived too
        assert_eq!(db.catalog().list_user_tables(), vec!["t"]);
    }
}

#[test]
fn row_count_matches_live_records_after_flush() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE t(id INT);").unwrap();
    for i in 0..10 {
        db.execute_sql(&format!("INSERT INTO t VALUES({i});"))
            .unwrap();
    }
    db.execute_sql("DELETE FROM t WHERE id < 4;").unwrap();
    db.flush().unwrap();

    let live = db.execute_sql("SELECT * FROM t;").unwrap().len() as i64;
    let counted = db.catalog().get_table_metadata("t").unwrap().row_count;
    assert_eq!(live, 6);
    assert_eq!(counted, live);
}

#[test]
fn global_aggregates() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    seed_employees(&db);

    let rows = db
        .execute_sql("SELECT COUNT(*) AS n, MIN(salary) AS lo, MAX(salary) AS hi FROM employees;")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(int(&rows[0]["n"]), 5);
    assert_eq!(int(&rows[0]["lo"]), 65000);
    assert_eq!(int(&rows[0]["hi"]), 85000);
}

#[test]
fn order_by_position_and_offset_limit() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    seed_employees(&db);

    let rows = db
        .execute_sql("SELECT name, salary FROM employees ORDER BY 2 ASC LIMIT 2, 2;")
        .unwrap();
    let names: Vec<&str> = rows.iter().map(|r| text(&r["name"])).collect();
    // salaries ascending: Bob 65k, Diana 70k, Alice 75k, Charlie 80k, Eve 85k
    assert_eq!(names, vec!["Alice", "Charlie"]);
}

#[test]
fn drop_table_frees_the_name() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE t(id INT);").unwrap();
    db.execute_sql("INSERT INTO t VALUES(1);").unwrap();
    db.execute_sql("DROP TABLE t;").unwrap();
    assert!(db.execute_sql("SELECT * FROM t;").is_err());
    // the name is reusable with a different shape
    db.execute_sql("CREATE TABLE t(x VARCHAR(4));").unwrap();
    assert!(db.execute_sql("SELECT * FROM t;").unwrap().is_empty());
}

#[test]
fn tiny_buffer_evicts_and_stays_correct() {
    let dir = tempdir().unwrap();
    let db = Database::open(Config {
        data_dir: dir.path().to_path_buf(),
        buffer_capacity: 2,
        ..Config::default()
    })
    .unwrap();

    db.execute_sql("CREATE TABLE t(id INT, pad VARCHAR(900));")
        .unwrap();
    let pad = "x".repeat(880);
    for i in 0..30 {
        db.execute_sql(&format!("INSERT INTO t VALUES({i}, '{pad}');"))
            .unwrap();
    }

    // capacity 2 cannot hold the working set: evictions with writeback
    let stats = db.storage().buffer_stats();
    assert!(stats.evictions > 0);
    assert!(stats.cached_pages <= 2);
    let events = db.storage().buffer_pool().recent_events(16);
    assert!(!events.is_empty());

    // every row survives the churn
    let rows = db.execute_sql("SELECT id FROM t;").unwrap();
    assert_eq!(rows.len(), 30);
}

#[test]
fn error_positions_are_reported() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let err = db.execute_sql("SELECT * FROM;").unwrap_err();
    assert!(err.pos().is_some());
    let err = db.execute_sql("SELECT 'unterminated FROM t;").unwrap_err();
    assert!(err.to_string().contains("lexical"), "{err}");
}

#[test]
fn multi_page_table_scans_in_insertion_order() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    db.execute_sql("CREATE TABLE big(id INT, pad VARCHAR(600));")
        .unwrap();
    let pad = "p".repeat(550);
    for i in 0..40 {
        db.execute_sql(&format!("INSERT INTO big VALUES({i}, '{pad}');"))
            .unwrap();
    }
    // 40 rows of ~550 bytes span several 4 KiB pages
    assert!(db.storage().get_table_info("big").unwrap().total_pages >= 3);

    let rows = db.execute_sql("SELECT id FROM big;").unwrap();
    let ids: Vec<i32> = rows.iter().map(|r| int(&r["id"])).collect();
    assert_eq!(ids, (0..40).collect::<Vec<_>>());
}
