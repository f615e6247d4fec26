use std::{
    fmt::Write as _,
    io::{self, Write},
};

use encoding_rs::Encoding;

use crate::{
    dictionary,
    model::{DataElement, Dataset, DicomValue, ElementContent},
    CommonResult,
};

/// Bytes shown before a value is cut short.
pub const PREVIEW_BYTES: usize = 16;
/// Values of a multi valued element shown before it is cut short.
const PREVIEW_VALUES: usize = 8;

// 大写十六进制，以空格分隔，超出部分用 ".." 表示
pub fn hex_preview(buffer: &[u8], limit: usize) -> String {
    let mut result = buffer
        .iter()
        .take(limit)
        .map(|ele| format!("{:02X}", ele))
        .collect::<Vec<String>>()
        .join(" ");

    if buffer.len() > limit {
        result.push_str(" ..");
    }

    result
}

fn join_values<T: ToString>(values: &[T]) -> String {
    let mut result = values
        .iter()
        .take(PREVIEW_VALUES)
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .join("\\");

    if values.len() > PREVIEW_VALUES {
        result.push_str("\\..");
    }

    result
}

/// One line rendering of an element value.
pub fn describe_value(element: &DataElement, charset: &'static Encoding) -> String {
    match element.content() {
        ElementContent::Items(items) => return format!("<{} items>", items.len()),
        ElementContent::Buffers(buffers) if buffers.len() > 1 => {
            let bytes = buffers.iter().map(|buffer| buffer.len()).sum::<usize>();
            return format!("<{} fragments, {} bytes>", buffers.len(), bytes);
        }
        ElementContent::Buffers(buffers) => {
            if let Some(buffer) = buffers.first() {
                if !buffer.is_loaded() {
                    return format!("<{} bytes, not loaded>", buffer.len());
                }
            }
        }
    }

    let value = match element.value(charset) {
        Ok(value) => value,
        Err(error) => return format!("<{}>", error),
    };

    match value {
        DicomValue::String(text) => {
            let text = text.trim_end_matches(['\0', ' ']);
            let mut shown = text.chars().take(64).collect::<String>();
            if shown.len() < text.len() {
                shown.push_str("..");
            }
            format!("\"{}\"", shown)
        }
        DicomValue::Tags(tags) => join_values(
            &tags
                .iter()
                .map(|(group, element)| format!("({})", dictionary::format_tag(*group, *element)))
                .collect::<Vec<String>>(),
        ),
        DicomValue::Float(v) => join_values(&v),
        DicomValue::Double(v) => join_values(&v),
        DicomValue::I32(v) => join_values(&v),
        DicomValue::I16(v) => join_values(&v),
        DicomValue::U32(v) => join_values(&v),
        DicomValue::U16(v) => join_values(&v),
        DicomValue::Bytes(v) => {
            let mut result = format!("[{} bytes]", v.len());
            if !v.is_empty() {
                let _ = write!(result, " {}", hex_preview(&v, PREVIEW_BYTES));
            }
            result
        }
        DicomValue::Sequence(items) => format!("<{} items>", items.len()),
    }
}

/// Writes the dataset as an indented tree, one element per line.
pub fn dump_dataset<W: Write>(dataset: &Dataset, output: &mut W) -> CommonResult<()> {
    dump_level(dataset, output, 0)?;
    Ok(())
}

fn dump_level<W: Write>(dataset: &Dataset, output: &mut W, depth: usize) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    let charset = dataset.charset();

    for ((group, _), elements) in dataset.groups() {
        for (id, element) in elements.elements() {
            writeln!(
                output,
                "{}({}) {} {:<32} {}",
                indent,
                dictionary::format_tag(group, id),
                element.vr().code(),
                dictionary::tag_name(group, id),
                describe_value(element, charset)
            )?;

            for (index, item) in element.items().iter().enumerate() {
                writeln!(output, "{}  item {}", indent, index + 1)?;
                dump_level(item, output, depth + 2)?;
            }
        }
    }

    Ok(())
}
