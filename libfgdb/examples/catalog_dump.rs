use libfgdb::{is_system_table, Database};

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("usage: catalog_dump <directory.gdb>");
    let db = Database::open(path)?;
    for entry in db.catalog().entries() {
        let marker = if is_system_table(&entry.name) { "*" } else { " " };
        println!("{:>6} {marker} {:<40} format {}", entry.id, entry.name, entry.format);
    }
    Ok(())
}
