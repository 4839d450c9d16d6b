use anyhow::{bail, Result};
use btree_engine::Engine;
use env_logger::Env;

// Temporary driver program so I can exercise the top level API without a
// separate project using the lib. There is no on-disk format here, so each
// process invocation starts from a fresh, empty `Engine` and runs exactly
// one command against it — `create`/`insert`/`scan` only see state created
// earlier in that same invocation, never a prior one, e.g. a single run of
//
//   insert widgets 1 hello
//
// creates `widgets` and inserts into it in one shot; a later, separate
// `scan widgets` invocation starts over and finds no such table.
fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("Missing <command>"),
        _ => {}
    }

    let mut engine = Engine::new();

    let command = &args[1];
    match command.as_str() {
        "create" => {
            let table_name = &args[2];
            engine.create_table(table_name)?;
            println!("created table {table_name}");
        }
        "insert" => {
            let table_name = &args[2];
            let key: u32 = args[3].parse()?;
            let payload = args[4].as_bytes().to_vec();

            let table = match engine.table(table_name) {
                Some(table) => table,
                None => engine.create_table(table_name)?,
            };
            let mut cursor = table.open_cursor()?;
            cursor.insert(key, payload)?;
            println!("inserted key {key} into {table_name}");
        }
        "scan" => {
            let table_name = &args[2];
            let table = engine
                .table(table_name)
                .ok_or_else(|| anyhow::anyhow!("no such table {table_name}"))?;
            let mut cursor = table.open_cursor()?;
            cursor.move_to(0)?;
            while let Some((key, payload)) = cursor.get()? {
                println!("{key}: {}", String::from_utf8_lossy(&payload));
                cursor.move_next()?;
            }
        }
        _ => bail!("Unknown command: {command}"),
    }

    Ok(())
}
