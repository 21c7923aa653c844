/// Handover Example
///
/// This example demonstrates:
/// - Two contexts pinned at the same version (a group and its snapshot)
/// - Exporting a view, sending it to another thread, and importing it
/// - The imported view staying stale until it is synced explicitly

use std::collections::HashMap;
use std::thread;
use tableview::{ColumnType, ColumnValue, Group, HandoverMode, Query, Schema, Table, UNBOUNDED};

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    println!("=== TableView Handover Example ===\n");

    let mut source = Group::new();
    let table = source.add_table(Table::new(
        "employees".to_string(),
        Schema::new(vec![
            ("name".to_string(), ColumnType::String, false),
            ("salary".to_string(), ColumnType::Int64, false),
        ]),
    ));
    for (name, salary) in [("Ann", 1000), ("Bob", 2000), ("Cid", 1500)] {
        let mut row = HashMap::new();
        row.insert("name".to_string(), ColumnValue::String(name.to_string()));
        row.insert("salary".to_string(), ColumnValue::Int64(salary));
        table.borrow_mut().append_row(row).unwrap();
    }

    let mut view = Query::parse("salary < 1800")
        .unwrap()
        .find_all_view(&table, 0, UNBOUNDED, UNBOUNDED)
        .unwrap();
    view.sort(1, false);
    println!("Source view:");
    print!("{}", view);

    // The worker gets its own context at the same version
    let (exported, patch) = view.export(HandoverMode::Copy);
    let destination = source.snapshot();
    let (exported, patch) = thread::spawn(move || {
        println!("\nExport of {} rows travelled to a worker thread", exported.len());
        (exported, patch)
    })
    .join()
    .unwrap();

    let destination_table = destination.table("employees").unwrap();
    let mut row = HashMap::new();
    row.insert("name".to_string(), ColumnValue::String("Dan".to_string()));
    row.insert("salary".to_string(), ColumnValue::Int64(1200));
    destination_table.borrow_mut().append_row(row).unwrap();

    let mut imported = exported.import(patch, &destination);
    println!("\nImported view, in sync: {}", imported.is_in_sync());
    print!("{}", imported);

    imported.sync_if_needed();
    println!("\nAfter sync, in sync: {}", imported.is_in_sync());
    print!("{}", imported);

    println!("\nSource view is unchanged: {} rows", view.len());
    println!("\n=== Example Complete ===");
}
