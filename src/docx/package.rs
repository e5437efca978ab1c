use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        Self::from_reader(f).with_context(|| format!("read docx: {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).context("read zip")?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data).context("read zip entry")?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// Serialises the package, substituting the given part bodies and keeping
    /// every entry's compression, timestamp and mode.
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<W> {
        let mut zout = ZipWriter::new(writer);
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        zout.finish().context("finish zip")
    }

    pub fn to_bytes(&self, replacements: &HashMap<String, Vec<u8>>) -> anyhow::Result<Vec<u8>> {
        Ok(self
            .write_to(Cursor::new(Vec::new()), replacements)?
            .into_inner())
    }

    /// Writes next to `output_path` first and renames into place, so a failed
    /// save never leaves a truncated document behind.
    pub fn write_with_replacements(
        &self,
        output_path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<()> {
        let file_name = output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output.docx".to_string());
        let tmp_path = output_path.with_file_name(format!(".{file_name}.tmp"));
        let f = File::create(&tmp_path)
            .with_context(|| format!("create output docx: {}", tmp_path.display()))?;
        let written = self.write_to(f, replacements).and_then(|f| {
            f.sync_all().context("sync output docx")?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        std::fs::rename(&tmp_path, output_path)
            .with_context(|| format!("move output docx into place: {}", output_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Builds an in-memory package from `(name, body)` pairs.
    pub fn build_docx(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, body) in parts {
            zout.start_file(*name, opts).expect("start file");
            zout.write_all(body.as_bytes()).expect("write file");
        }
        zout.finish().expect("finish").into_inner()
    }
}
