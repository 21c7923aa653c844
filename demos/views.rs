/// Views Example
///
/// This example demonstrates:
/// - Building a view from a query and keeping it in sync
/// - How erased rows show up as detached slots until the next sync
/// - Sorting, distinct views and aggregates
/// - Link-list views

use std::collections::HashMap;
use tableview::{
    AggrType, ColumnType, ColumnValue, LinkList, Query, Schema, Table, TableView, UNBOUNDED,
};

const PRODUCT: usize = 0;
const CATEGORY: usize = 1;
const PRICE: usize = 2;
const QUANTITY: usize = 3;

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    println!("=== TableView Example ===\n");

    // 1. Create a sales table
    println!("1. Creating sales table...");
    let schema = Schema::new(vec![
        ("product".to_string(), ColumnType::String, false),
        ("category".to_string(), ColumnType::String, false),
        ("price".to_string(), ColumnType::Float64, false),
        ("quantity".to_string(), ColumnType::Int32, false),
    ]);
    let table = Table::new("sales".to_string(), schema).into_ref();
    {
        let mut t = table.borrow_mut();
        let items = vec![
            ("Laptop", "Electronics", 999.99, 5),
            ("Mouse", "Electronics", 29.99, 20),
            ("Desk", "Furniture", 299.99, 3),
            ("Chair", "Furniture", 199.99, 8),
            ("Monitor", "Electronics", 399.99, 10),
        ];
        for (product, category, price, quantity) in items {
            let mut row = HashMap::new();
            row.insert("product".to_string(), ColumnValue::String(product.to_string()));
            row.insert("category".to_string(), ColumnValue::String(category.to_string()));
            row.insert("price".to_string(), ColumnValue::Float64(price));
            row.insert("quantity".to_string(), ColumnValue::Int32(quantity));
            t.append_row(row).unwrap();
        }
    }
    println!("   Added {} products\n", table.borrow().len());

    // 2. Query view
    println!("2. Products under 400...");
    let query = Query::parse("price < 400").unwrap();
    let mut cheap = query.find_all_view(&table, 0, UNBOUNDED, UNBOUNDED).unwrap();
    print!("{}", cheap);
    println!("   Total quantity: {}\n", cheap.sum_int(QUANTITY));

    // 3. Erase a row: the view keeps a detached slot until it is synced
    println!("3. Erasing 'Mouse' from the table...");
    table.borrow_mut().erase_row(1).unwrap();
    println!(
        "   In sync: {}, attached rows: {} of {}",
        cheap.is_in_sync(),
        cheap.num_attached_rows(),
        cheap.len()
    );
    print!("{}", cheap);
    cheap.sync_if_needed();
    println!("   After sync:");
    print!("{}", cheap);
    println!();

    // 4. Sorting sticks across syncs
    println!("4. Sorting by price, descending...");
    cheap.sort(PRICE, false);
    let mut row = HashMap::new();
    row.insert("product".to_string(), ColumnValue::String("Lamp".to_string()));
    row.insert("category".to_string(), ColumnValue::String("Furniture".to_string()));
    row.insert("price".to_string(), ColumnValue::Float64(349.0));
    row.insert("quantity".to_string(), ColumnValue::Int32(4));
    table.borrow_mut().append_row(row).unwrap();
    cheap.sync_if_needed();
    for i in 0..cheap.len() {
        println!(
            "   {} at {:.2}",
            cheap.get_string(PRODUCT, i).unwrap_or_default(),
            cheap.get_double(PRICE, i).unwrap_or_default()
        );
    }
    let mut ndx = 0;
    let top = cheap.maximum_double(PRICE, Some(&mut ndx));
    println!("   Most expensive: {:.2} at position {}\n", top, ndx);

    // 5. Distinct view and grouped aggregate
    println!("5. Categories...");
    let categories = TableView::distinct(&table, CATEGORY);
    for i in 0..categories.len() {
        println!("   {}", categories.get_string(CATEGORY, i).unwrap_or_default());
    }
    let all = TableView::range(&table, 0, UNBOUNDED);
    let per_category = all.aggregate(CATEGORY, QUANTITY, AggrType::Sum);
    println!("   Quantity per category:");
    println!("{}", per_category.to_json().unwrap());
    println!();

    // 6. Link-list view
    println!("6. Orders linking to products...");
    let orders = Table::new(
        "orders".to_string(),
        Schema::new(vec![("items".to_string(), ColumnType::LinkList, false)]),
    )
    .into_ref();
    Table::link(&orders, "items", &table).unwrap();
    orders.borrow_mut().add_empty_rows(1).unwrap();
    let items = LinkList::new(&orders, 0, 0).unwrap();
    items.add(0).unwrap();
    items.add(2).unwrap();
    let mut order_view = TableView::from_link_list(&items);
    println!("   Order has {} items", order_view.len());
    items.add(3).unwrap();
    order_view.sync_if_needed();
    println!("   After adding one: {} items", order_view.len());
    println!("   Order value: {:.2}", order_view.sum_double(PRICE));

    println!("\n=== Example Complete ===");
}
