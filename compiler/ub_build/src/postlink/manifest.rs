//! Symbol manifest for crash symbolication.
//!
//! The manifest ties the managed debug data of a build to the native
//! executable through the executable's Mach-O build UUIDs, one per
//! architecture slice.

use std::fmt::Write as _;

use object::read::macho::{FatArch, MachOFatFile32, MachOFatFile64};
use object::{FileKind, Object};

/// `manifest.xml` contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsymManifest {
    pub app_id: String,
    /// Local time of the build, RFC 3339.
    pub build_date: String,
    pub build_ids: Vec<String>,
}

impl MsymManifest {
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<mono-debug version=\"1\">\n");
        let _ = writeln!(xml, "  <app-id>{}</app-id>", escape(&self.app_id));
        let _ = writeln!(xml, "  <build-date>{}</build-date>", escape(&self.build_date));
        for id in &self.build_ids {
            let _ = writeln!(xml, "  <build-id>{id}</build-id>");
        }
        xml.push_str("</mono-debug>\n");
        xml
    }
}

/// Whether two manifest texts differ only in their build date.
pub fn same_apart_from_date(a: &str, b: &str) -> bool {
    let strip = |text: &str| -> Vec<String> {
        text.lines()
            .filter(|l| !l.trim_start().starts_with("<build-date>"))
            .map(str::to_string)
            .collect()
    };
    strip(a) == strip(b)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
pub fn format_uuid(uuid: &[u8; 16]) -> String {
    let mut text = String::with_capacity(36);
    for (i, byte) in uuid.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            text.push('-');
        }
        let _ = write!(text, "{byte:02X}");
    }
    text
}

/// Build UUIDs of a thin or universal Mach-O binary, in slice order.
///
/// `Ok(None)` when the data is not Mach-O at all.
pub fn mach_build_ids(data: &[u8]) -> object::Result<Option<Vec<String>>> {
    let Ok(kind) = FileKind::parse(data) else {
        return Ok(None);
    };
    let slices: Vec<&[u8]> = match kind {
        FileKind::MachO32 | FileKind::MachO64 => vec![data],
        FileKind::MachOFat32 => MachOFatFile32::parse(data)?
            .arches()
            .iter()
            .map(|arch| arch.data(data))
            .collect::<object::Result<_>>()?,
        FileKind::MachOFat64 => MachOFatFile64::parse(data)?
            .arches()
            .iter()
            .map(|arch| arch.data(data))
            .collect::<object::Result<_>>()?,
        _ => return Ok(None),
    };

    let mut ids = Vec::new();
    for slice in slices {
        let file = object::File::parse(slice)?;
        if let Some(uuid) = file.mach_uuid()? {
            ids.push(format_uuid(&uuid));
        }
    }
    Ok(Some(ids))
}
