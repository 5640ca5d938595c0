//! Files command

use anyhow::{Result, bail};
use syncimg_schema::FileQuery;

use crate::FilesArgs;

/// Print `<serial> <arch> <file_type> <checksum> <url>` per selected file.
pub fn files(args: &FilesArgs) -> Result<()> {
    let catalog = super::read_catalog(&args.catalog)?;
    if !catalog.has_stream(&args.distro, &args.stream) {
        bail!("Catalog has no {} stream for {}", args.stream, args.distro);
    }

    let query = FileQuery {
        release_tag: args.tag.clone(),
        arches: args.arch.clone(),
        included: args.include.clone(),
        excluded: args.exclude.clone(),
        serial: args.serial.clone(),
        all_serials: args.all,
        include_unpacked: args.unpacked,
    };

    for listed in catalog.file_listing(&args.distro, &args.stream, &query) {
        let checksum = listed
            .file
            .checksum()
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let url = listed.url.as_deref().unwrap_or(&listed.file.path);
        println!(
            "{} {} {} {checksum} {url}",
            listed.build_serial, listed.arch, listed.file.file_type
        );
    }
    Ok(())
}
