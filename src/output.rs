use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::PlateError;
use crate::render::{CancelToken, HeatmapFrame, Renderer, ScatterSeries};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
enum JsonView<'a> {
    Scatter { series: &'a [ScatterSeries] },
    Heatmap { frame: &'a HeatmapFrame },
}

/// Writes each prepared view as one JSON line. Nothing stays on screen, so
/// both calls return as soon as the line is written.
pub struct JsonRenderer<W: Write + Send = io::Stdout> {
    writer: Mutex<W>,
}

impl JsonRenderer {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<(), PlateError> {
        let json = serde_json::to_string(value)
            .map_err(|err| PlateError::RenderDispatch(err.to_string()))?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| PlateError::RenderDispatch("output lock poisoned".to_string()))?;
        writeln!(writer, "{json}")
            .and_then(|_| writer.flush())
            .map_err(|err| PlateError::Filesystem(err.to_string()))
    }
}

impl<W: Write + Send> Renderer for JsonRenderer<W> {
    fn scatter(&self, series: &[ScatterSeries], cancel: &CancelToken) -> Result<(), PlateError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.print_json(&JsonView::Scatter { series })
    }

    fn heatmap(&self, frame: &HeatmapFrame, cancel: &CancelToken) -> Result<(), PlateError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.print_json(&JsonView::Heatmap { frame })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::config::ChannelSettings;
    use crate::domain::SourceIdentity;
    use crate::parser::RecordParser;
    use crate::render::heatmap_frames;

    #[test]
    fn heatmap_line_is_tagged() {
        let reading = RecordParser::parse_content(
            SourceIdentity::new("/data/20230615101500_X_Y_ARR7.csv"),
            "Dye,ROX\nA,2000\n",
        )
        .unwrap();
        let frames = heatmap_frames(&reading, &ChannelSettings::default());
        let renderer = JsonRenderer::new(Vec::new());
        renderer.heatmap(&frames[0], &CancelToken::new()).unwrap();

        let output = String::from_utf8(renderer.into_inner()).unwrap();
        let value: Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["view"], "heatmap");
        assert_eq!(value["frame"]["title"], "Array ARR7 ROX values");
        assert_eq!(value["frame"]["channel"], "rox");
        assert_eq!(value["frame"]["table"]["cells"][0][0], 2000.0);
        assert!(value["frame"]["table"]["cells"][0][1].is_null());
    }

    #[test]
    fn cancelled_render_writes_nothing() {
        let renderer = JsonRenderer::new(Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        renderer.scatter(&[], &cancel).unwrap();
        assert!(renderer.into_inner().is_empty());
    }
}
