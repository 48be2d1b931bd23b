use datasubset_core::ExportConfig;
use schemars::schema_for;

fn main() {
    let schema = schema_for!(ExportConfig);
    let json = serde_json::to_string_pretty(&schema).expect("serialize json schema");
    println!("{json}");
}
