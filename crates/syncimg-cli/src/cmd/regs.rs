//! Regs command

use anyhow::{Context, Result, bail};
use syncimg_schema::RegistrationFilter;

use crate::RegsArgs;

pub fn regs(args: &RegsArgs) -> Result<()> {
    let catalog = super::read_catalog(&args.catalog)?;
    if !catalog.has_stream(&args.distro, &args.stream) {
        bail!("Catalog has no {} stream for {}", args.stream, args.distro);
    }

    let filter = RegistrationFilter {
        release_tag: args.tag.clone(),
        arch: args.arch.clone(),
        cloud: args.cloud.clone(),
        instance_type: args.instance_type.clone(),
        region: args.region.clone(),
        latest_only: !args.all_builds,
    };
    let rows = catalog.registrations(&args.distro, &args.stream, &filter);

    if args.json {
        let text = serde_json::to_string_pretty(&rows).context("Failed to encode rows")?;
        println!("{text}");
        return Ok(());
    }

    for row in &rows {
        println!(
            "{} {} {} {} {} {} {}",
            row.build_serial,
            row.release_tag,
            row.arch,
            row.cloud,
            row.instance_type,
            row.region,
            row.published_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
