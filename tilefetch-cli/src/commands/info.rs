//! Describe the configured tile source.

use tilefetch::source::{Source, TileSource};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the info command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("info");
    let source = runner.source()?;
    println!("Config:      {}", runner.config_path().display());
    print!("{}", describe(&source, runner.config().loader.concurrent_connections));
    Ok(())
}

fn describe(source: &Source, connections: usize) -> String {
    let mut lines = vec![
        format!("Name:        {}", source.name()),
        format!("Id:          {}", source.id()),
        format!("Zoom:        {} - {}", source.min_zoom(), source.max_zoom()),
        format!("Tile size:   {} px", source.tile_size()),
        format!("Extension:   {}", source.extension()),
        format!("CRS:         {}", source.server_crs()),
    ];

    match source {
        Source::MapService(service) => {
            lines.push(format!("Template:    {}", service.template()));
            lines.push(format!("Connections: {}", connections));
            if service.mod_tile_features() {
                lines.push("mod_tile:    enabled".to_string());
            }
        }
        Source::MbTiles(archive) => {
            lines.push(format!("Archive:     {}", archive.path().display()));
            if !archive.is_available() {
                lines.push("Status:      unavailable (see log)".to_string());
            }
            lines.push(format!("Tileset:     {}", archive.tileset_type()));
            lines.push(format!("MIME type:   {}", archive.tile_mime_type()));
            lines.push(format!("Flip rows:   {}", archive.flip_y()));
        }
    }

    let attribution = source.attribution();
    if attribution.requires_attribution() {
        lines.push("Attribution:".to_string());
        let fields = [
            ("text", attribution.text()),
            ("link", attribution.link_url()),
            ("image", attribution.image_url()),
            ("terms", attribution.terms_of_use_text()),
            ("terms url", attribution.terms_of_use_url()),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                lines.push(format!("  {:<10} {}", label, value));
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilefetch::source::{Attribution, MapServiceInfo, MapServiceSource, MbTilesSource};

    #[test]
    fn test_describe_map_service() {
        let info = MapServiceInfo::new("OSM", "https://tile.openstreetmap.org")
            .with_max_zoom(19)
            .with_attribution(Attribution::new().with_text("(c) OpenStreetMap"));
        let source = Source::from(MapServiceSource::new(info).unwrap());

        let text = describe(&source, 8);
        assert!(text.contains("Name:        OSM"));
        assert!(text.contains("Zoom:        0 - 19"));
        assert!(text.contains("Template:    https://tile.openstreetmap.org/{z}/{x}/{y}.{ext}"));
        assert!(text.contains("(c) OpenStreetMap"));
    }

    #[test]
    fn test_describe_unavailable_archive() {
        let source = Source::from(MbTilesSource::open("/nonexistent/world.mbtiles"));
        let text = describe(&source, 8);
        assert!(text.contains("unavailable"));
        assert!(text.contains("Tileset:     ???"));
        assert!(!text.contains("Attribution"));
    }
}
