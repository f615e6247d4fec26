use std::{collections::HashMap, fmt};

use lazy_static::lazy_static;
use regex::Regex;

/// Value representation of a data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FL,
    FD,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
}

pub const ALL_VRS: [Vr; 31] = [
    Vr::AE,
    Vr::AS,
    Vr::AT,
    Vr::CS,
    Vr::DA,
    Vr::DS,
    Vr::DT,
    Vr::FL,
    Vr::FD,
    Vr::IS,
    Vr::LO,
    Vr::LT,
    Vr::OB,
    Vr::OD,
    Vr::OF,
    Vr::OL,
    Vr::OW,
    Vr::PN,
    Vr::SH,
    Vr::SL,
    Vr::SQ,
    Vr::SS,
    Vr::ST,
    Vr::TM,
    Vr::UC,
    Vr::UI,
    Vr::UL,
    Vr::UN,
    Vr::UR,
    Vr::US,
    Vr::UT,
];

impl Vr {
    pub fn code(self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FL => "FL",
            Vr::FD => "FD",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
        }
    }

    pub fn from_code(code: &str) -> Option<Vr> {
        ALL_VRS.iter().copied().find(|vr| vr.code() == code)
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Option<Vr> {
        std::str::from_utf8(&bytes).ok().and_then(Vr::from_code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Vr::AE => "Application Entity",
            Vr::AS => "Age String",
            Vr::AT => "Attribute Tag",
            Vr::CS => "Code String",
            Vr::DA => "Date",
            Vr::DS => "Decimal String",
            Vr::DT => "Date Time",
            Vr::FL => "Floating Point Single",
            Vr::FD => "Floating Point Double",
            Vr::IS => "Integer String",
            Vr::LO => "Long String",
            Vr::LT => "Long Text",
            Vr::OB => "Other Byte String",
            Vr::OD => "Other Double String",
            Vr::OF => "Other Float String",
            Vr::OL => "Other Long String",
            Vr::OW => "Other Word String",
            Vr::PN => "Person Name",
            Vr::SH => "Short String",
            Vr::SL => "Signed Long",
            Vr::SQ => "Sequence of Items",
            Vr::SS => "Signed Short",
            Vr::ST => "Short Text",
            Vr::TM => "Time",
            Vr::UC => "Unlimited Characters",
            Vr::UI => "Unique Identifier (UID)",
            Vr::UL => "Unsigned Long",
            Vr::UN => "Unknown",
            Vr::UR => "Universal Resource Identifier",
            Vr::US => "Unsigned Short",
            Vr::UT => "Unlimited Text",
        }
    }

    /// Explicit VR headers of these types carry 2 reserved bytes and a 32 bit length.
    pub fn is_long_length(self) -> bool {
        matches!(
            self,
            Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OW | Vr::SQ | Vr::UC | Vr::UN | Vr::UR | Vr::UT
        )
    }

    /// Size of the words swapped when the stream is big endian. 0 for byte data.
    pub fn word_size(self) -> usize {
        match self {
            Vr::AT | Vr::OW | Vr::SS | Vr::US => 2,
            Vr::FL | Vr::OF | Vr::OL | Vr::SL | Vr::UL => 4,
            Vr::FD | Vr::OD => 8,
            _ => 0,
        }
    }

    /// Maximum value length in bytes, 0 when unbounded.
    pub fn max_length(self) -> usize {
        match self {
            Vr::AE | Vr::CS | Vr::DS | Vr::SH | Vr::TM => 16,
            Vr::DT => 26,
            Vr::IS => 12,
            Vr::LO | Vr::PN | Vr::UI => 64,
            Vr::LT => 10240,
            Vr::ST => 1024,
            _ => 0,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            Vr::AE
                | Vr::AS
                | Vr::CS
                | Vr::DA
                | Vr::DS
                | Vr::DT
                | Vr::IS
                | Vr::LO
                | Vr::LT
                | Vr::PN
                | Vr::SH
                | Vr::ST
                | Vr::TM
                | Vr::UC
                | Vr::UI
                | Vr::UR
                | Vr::UT
        )
    }

    /// Byte appended to odd length values.
    pub fn padding_byte(self) -> u8 {
        if self.is_string() && self != Vr::UI {
            b' '
        } else {
            0
        }
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub vr: Vr,
    pub name: String,
}

#[derive(Debug, Default)]
struct TagMapping {
    full_match: HashMap<u32, TagInfo>,
    partial_match: Vec<(Regex, TagInfo)>,
}

const TAG_MAPPING_SOURCE: &str = include_str!("tag_mapping.tsv");

lazy_static! {
    static ref TAG_MAPPING: TagMapping = load_tag_mapping(TAG_MAPPING_SOURCE);
}

/// Parses `gggg,eeee<TAB>VR<TAB>Name` lines. Tags with `x` digits describe
/// repeating groups and are matched by regex.
fn load_tag_mapping(source: &str) -> TagMapping {
    let mut mapping = TagMapping::default();

    for (index, line) in source.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = line.split('\t').collect::<Vec<&str>>();
        if fields.len() < 3 {
            tracing::warn!(line = index + 1, "malformed tag mapping line");
            continue;
        }
        let Some(vr) = Vr::from_code(fields[1]) else {
            tracing::warn!(line = index + 1, vr = fields[1], "unknown VR in tag mapping");
            continue;
        };
        let standard_tag = fields[0].to_uppercase().replace('X', "x");
        let info = TagInfo {
            vr,
            name: fields[2].to_string(),
        };

        if standard_tag.contains('x') {
            let pattern = format!("^{}$", standard_tag.replace('x', "[0-9A-F]"));
            match Regex::new(&pattern) {
                Ok(regex) => mapping.partial_match.push((regex, info)),
                Err(error) => tracing::warn!(%error, "invalid tag pattern {}", standard_tag),
            }
        } else {
            match parse_tag(&standard_tag) {
                Some(tag) => {
                    mapping.full_match.entry(tag).or_insert(info);
                }
                None => tracing::warn!(line = index + 1, "invalid tag {}", standard_tag),
            }
        }
    }

    mapping
}

/// Parses `gggg,eeee` into a combined tag value.
pub fn parse_tag(text: &str) -> Option<u32> {
    let (group, element) = text.split_once(',')?;
    let group = u16::from_str_radix(group.trim(), 16).ok()?;
    let element = u16::from_str_radix(element.trim(), 16).ok()?;
    Some(((group as u32) << 16) | element as u32)
}

pub fn format_tag(group: u16, element: u16) -> String {
    format!("{:04X},{:04X}", group, element)
}

pub fn lookup(group: u16, element: u16) -> Option<&'static TagInfo> {
    let tag = ((group as u32) << 16) | element as u32;
    if let Some(info) = TAG_MAPPING.full_match.get(&tag) {
        return Some(info);
    }
    let text = format_tag(group, element);
    TAG_MAPPING
        .partial_match
        .iter()
        .find(|(regex, _)| regex.is_match(&text))
        .map(|(_, info)| info)
}

/// VR used when the stream does not state one.
pub fn default_vr(group: u16, element: u16) -> Vr {
    match lookup(group, element) {
        Some(info) => info.vr,
        None if element == 0 => Vr::UL,
        None => Vr::UN,
    }
}

pub fn tag_name(group: u16, element: u16) -> &'static str {
    match lookup(group, element) {
        Some(info) => info.name.as_str(),
        None if element == 0 => "Group Length",
        None => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vr_properties() {
        assert!(Vr::OB.is_long_length());
        assert!(!Vr::US.is_long_length());
        assert_eq!(Vr::OW.word_size(), 2);
        assert_eq!(Vr::FD.word_size(), 8);
        assert_eq!(Vr::UI.padding_byte(), 0);
        assert_eq!(Vr::LO.padding_byte(), b' ');
        assert_eq!(Vr::from_bytes(*b"SQ"), Some(Vr::SQ));
        assert_eq!(Vr::from_bytes([0x10, 0x00]), None);
    }

    #[test]
    fn dictionary_lookups() {
        assert_eq!(default_vr(0x0002, 0x0010), Vr::UI);
        assert_eq!(default_vr(0x0028, 0x0010), Vr::US);
        assert_eq!(default_vr(0x7FE0, 0x0010), Vr::OW);
        assert_eq!(tag_name(0x0028, 0x0010), "Rows");
        assert_eq!(default_vr(0x0009, 0x1001), Vr::UN);
        assert_eq!(default_vr(0x0009, 0x0000), Vr::UL);
    }

    #[test]
    fn repeating_groups_match_by_pattern() {
        assert_eq!(default_vr(0x6002, 0x3000), Vr::OW);
        assert_eq!(tag_name(0x6002, 0x0010), "Overlay Rows");
        assert_eq!(default_vr(0x5004, 0x3000), Vr::OB);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mapping = load_tag_mapping("0010,0010\tPN\tPatient Name\nbroken\n0010,0020\tZZ\tBad\n");
        assert_eq!(mapping.full_match.len(), 1);
    }

    #[test]
    fn parses_tag_text() {
        assert_eq!(parse_tag("7FE0,0010"), Some(0x7FE0_0010));
        assert_eq!(parse_tag("7FE0"), None);
    }
}
