use anyhow::Result;

use super::{BuildOverrides, GlobalArgs, load_plan};
use crate::output::{OutputFormat, print_field, print_json, print_section};

/// Print the resolved build plan.
pub fn cmd_show(global: &GlobalArgs, output: OutputFormat) -> Result<i32> {
  let plan = load_plan(global, &BuildOverrides::default())?;

  if output.is_json() {
    print_json(&plan)?;
    return Ok(0);
  }

  print_section("Layout");
  print_field("Root", &plan.layout.root.display().to_string());
  print_field("Source", &plan.layout.source.display().to_string());
  print_field("Compilers", &plan.layout.compilers.display().to_string());
  print_field("Temp", &plan.layout.temp.display().to_string());
  print_field("Output", &plan.layout.output.display().to_string());
  print_field("Log file", &plan.layout.log_file.display().to_string());

  println!();
  print_section("Resources");
  for resource in &plan.resources {
    print_field(&resource.name, &resource.url);
  }

  println!();
  print_section("Links");
  for link in &plan.links {
    print_field(&link.link.display().to_string(), &link.target.display().to_string());
  }

  println!();
  print_section("Build");
  print_field("Directory", &plan.build_dir.display().to_string());
  print_field("Tool", &plan.build_tool.display().to_string());
  let extractor = plan
    .extractor
    .as_ref()
    .map(|p| p.display().to_string())
    .unwrap_or_else(|| "7z (from PATH)".to_string());
  print_field("Extractor", &extractor);
  print_field("Clock", &format!("{} {}", plan.clock.target.to_rfc3339(), plan.clock.timezone));

  println!();
  print_section("Expected checksums");
  for (name, digest) in plan.checksums.iter() {
    print_field(name, digest);
  }

  Ok(0)
}
