use std::fs;

fn main() -> anyhow::Result<()> {
    // Use the crate-local docs builder to generate the OpenAPI at runtime.
    let doc = passaporte::docs::build_openapi(8000)?;
    let s = serde_json::to_string_pretty(&doc)?;
    let path = "openapi.json";
    fs::write(path, s)?;
    println!("wrote {}", path);
    Ok(())
}
