use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One surah as delivered by the AlQuran Cloud surah list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Surah {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub english_name: String,
    #[serde(default)]
    pub english_name_translation: String,
    #[serde(rename = "numberOfAyahs")]
    pub ayah_count: u32,
}

/// Ordered surah catalog. Immutable once loaded; shared read-only by every
/// open session. `surahs` is sorted by `number` ascending with no gaps.
#[derive(Debug, Clone, Default)]
pub struct SurahCatalog {
    surahs: Vec<Surah>,
}

impl SurahCatalog {
    pub fn new(mut surahs: Vec<Surah>) -> Self {
        surahs.sort_by_key(|s| s.number);
        SurahCatalog { surahs }
    }

    pub fn is_empty(&self) -> bool {
        self.surahs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.surahs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Surah> {
        self.surahs.iter()
    }

    pub fn by_number(&self, number: u32) -> Option<&Surah> {
        self.surahs.iter().find(|s| s.number == number)
    }

    /// Resolve a surah by Arabic name (substring match, the stored names carry
    /// diacritics users rarely type), by english name or translation
    /// (case-insensitive), or by a purely numeric catalog position.
    pub fn lookup(&self, name_or_number: &str) -> Option<&Surah> {
        let q = name_or_number.trim();
        if q.is_empty() {
            return None;
        }
        if let Ok(n) = q.parse::<u32>() {
            return self.by_number(n);
        }
        if let Some(s) = self.surahs.iter().find(|s| s.name.contains(q)) {
            return Some(s);
        }
        self.surahs
            .iter()
            .find(|s| !s.english_name.is_empty() && s.english_name.eq_ignore_ascii_case(q))
            .or_else(|| {
                self.surahs.iter().find(|s| {
                    !s.english_name_translation.is_empty()
                        && s.english_name_translation.eq_ignore_ascii_case(q)
                })
            })
    }

    /// Surah immediately following `current` in catalog order, `None` if
    /// `current` is the last one.
    pub fn next(&self, current: &Surah) -> Option<&Surah> {
        let pos = self.surahs.iter().position(|s| s.number == current.number)?;
        self.surahs.get(pos + 1)
    }
}

/// Parse a fetched surah-list file. Accepts either the raw AlQuran Cloud
/// response (`{ "data": [...] }`) or a bare array.
pub fn parse_surah_list_file(path: &Path) -> anyhow::Result<Vec<Surah>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file {}", path.to_string_lossy()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).context("catalog file is invalid JSON")?;
    let arr = value
        .get("data")
        .and_then(|d| d.as_array())
        .or_else(|| value.as_array())
        .context("catalog file has no surah array")?;
    let mut surahs = Vec::with_capacity(arr.len());
    for item in arr {
        let surah: Surah = serde_json::from_value(item.clone())
            .with_context(|| format!("bad surah entry: {}", item))?;
        surahs.push(surah);
    }
    if surahs.is_empty() {
        anyhow::bail!("catalog file contains no surahs");
    }
    Ok(surahs)
}

pub fn store_catalog(conn: &Connection, surahs: &[Surah]) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM surahs", [])?;
    for s in surahs {
        tx.execute(
            "INSERT INTO surahs(number, name, english_name, english_name_translation, ayah_count)
             VALUES(?, ?, ?, ?, ?)",
            (
                s.number,
                &s.name,
                &s.english_name,
                &s.english_name_translation,
                s.ayah_count,
            ),
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Rehydrate the catalog from the workspace database. An empty table yields
/// `None` so callers degrade to "cannot compute" instead of an empty catalog.
pub fn load_catalog(conn: &Connection) -> anyhow::Result<Option<SurahCatalog>> {
    let mut stmt = conn.prepare(
        "SELECT number, name, english_name, english_name_translation, ayah_count
         FROM surahs ORDER BY number",
    )?;
    let surahs = stmt
        .query_map([], |r| {
            Ok(Surah {
                number: r.get(0)?,
                name: r.get(1)?,
                english_name: r.get(2)?,
                english_name_translation: r.get(3)?,
                ayah_count: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if surahs.is_empty() {
        return Ok(None);
    }
    Ok(Some(SurahCatalog::new(surahs)))
}

#[cfg(test)]
pub(crate) fn test_catalog() -> SurahCatalog {
    SurahCatalog::new(vec![
        Surah {
            number: 1,
            name: "سُورَةُ ٱلْفَاتِحَةِ".to_string(),
            english_name: "Al-Faatiha".to_string(),
            english_name_translation: "The Opening".to_string(),
            ayah_count: 7,
        },
        Surah {
            number: 2,
            name: "سُورَةُ البَقَرَةِ".to_string(),
            english_name: "Al-Baqara".to_string(),
            english_name_translation: "The Cow".to_string(),
            ayah_count: 286,
        },
        Surah {
            number: 3,
            name: "سُورَةُ آلِ عِمْرَانَ".to_string(),
            english_name: "Aal-i-Imraan".to_string(),
            english_name_translation: "The Family of Imraan".to_string(),
            ayah_count: 200,
        },
        Surah {
            number: 4,
            name: "سُورَةُ النَّاسِ".to_string(),
            english_name: "An-Naas".to_string(),
            english_name_translation: "Mankind".to_string(),
            ayah_count: 6,
        },
    ])
}
