use libfgdb::{Database, Value};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let usage = "usage: table_dump <directory.gdb> <table>";
    let directory = args.next().expect(usage);
    let name = args.next().expect(usage);

    let db = Database::open(directory)?;
    let mut table = db.open_table(&name)?;
    let field_names: Vec<String> = table.fields().iter().map(|f| f.name.clone()).collect();
    for row in table.scan() {
        let (oid, values) = row?;
        println!("-- row {oid}");
        for (field, value) in field_names.iter().zip(&values) {
            match value {
                Value::Geometry(blob) => println!("   {field}: {:?}", blob.shape()?),
                other => println!("   {field}: {other}"),
            }
        }
    }
    Ok(())
}
