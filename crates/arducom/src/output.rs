use clap::ValueEnum;

/// Payload input/output formats, named as the reference tool names them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum Format {
    Hex,
    Raw,
    Bin,
    Byte,
    Int16,
    Int32,
    Int64,
    Float,
}

/// Parse a payload string into bytes according to the format. For every
/// format except `Raw`, a separator splits the string into parts that
/// are parsed independently.
pub fn parse_payload(input: &str, format: Format, separator: Option<char>) -> Result<Vec<u8>, String> {
    if format != Format::Raw {
        if let Some(sep) = separator {
            if input.contains(sep) {
                let mut bytes = Vec::new();
                for part in input.split(sep) {
                    bytes.extend(parse_payload(part, format, None)?);
                }
                return Ok(bytes);
            }
        }
    }

    match format {
        Format::Raw => Ok(input.as_bytes().to_vec()),
        Format::Hex => {
            if input.len() % 2 != 0 {
                return Err("hex input must have even length".into());
            }
            (0..input.len())
                .step_by(2)
                .map(|i| {
                    u8::from_str_radix(&input[i..i + 2], 16)
                        .map_err(|_| format!("invalid hex input: {input:?}"))
                })
                .collect()
        }
        Format::Bin => {
            if input.len() % 8 != 0 {
                return Err("binary input must be a multiple of 8 digits".into());
            }
            (0..input.len())
                .step_by(8)
                .map(|i| {
                    u8::from_str_radix(&input[i..i + 8], 2)
                        .map_err(|_| format!("invalid binary input: {input:?}"))
                })
                .collect()
        }
        Format::Byte => {
            let value: u8 = input
                .parse()
                .map_err(|_| format!("expected a value 0..=255, got {input:?}"))?;
            Ok(vec![value])
        }
        Format::Int16 => {
            let value: i16 = input
                .parse()
                .map_err(|_| format!("expected a 16-bit integer, got {input:?}"))?;
            Ok(value.to_le_bytes().to_vec())
        }
        Format::Int32 => {
            let value: i32 = input
                .parse()
                .map_err(|_| format!("expected a 32-bit integer, got {input:?}"))?;
            Ok(value.to_le_bytes().to_vec())
        }
        Format::Int64 => {
            let value: i64 = input
                .parse()
                .map_err(|_| format!("expected a 64-bit integer, got {input:?}"))?;
            Ok(value.to_le_bytes().to_vec())
        }
        Format::Float => {
            let value: f32 = input
                .parse()
                .map_err(|_| format!("expected a float, got {input:?}"))?;
            Ok(value.to_le_bytes().to_vec())
        }
    }
}

/// Render reply bytes in the output format.
pub fn format_output(bytes: &[u8], format: Format, separator: Option<char>) -> Result<String, String> {
    let sep = separator.map(String::from).unwrap_or_default();
    match format {
        Format::Hex => Ok(bytes.iter().map(|b| format!("{b:02X}")).collect()),
        Format::Bin => Ok(bytes
            .iter()
            .map(|b| format!("{b:08b}"))
            .collect::<Vec<_>>()
            .join(&sep)),
        Format::Raw => Ok(bytes
            .iter()
            .map(|&b| {
                if (b' '..=0x7F).contains(&b) {
                    char::from(b)
                } else {
                    '.'
                }
            })
            .collect()),
        Format::Byte => Ok(bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(&sep)),
        Format::Int16 => chunked(bytes, 2, &sep, |chunk| {
            i16::from_le_bytes([chunk[0], chunk[1]]).to_string()
        }),
        Format::Int32 => chunked(bytes, 4, &sep, |chunk| {
            i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string()
        }),
        Format::Int64 => chunked(bytes, 8, &sep, |chunk| {
            i64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ])
            .to_string()
        }),
        Format::Float => chunked(bytes, 4, &sep, |chunk| {
            f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string()
        }),
    }
}

fn chunked(
    bytes: &[u8],
    width: usize,
    separator: &str,
    render: impl Fn(&[u8]) -> String,
) -> Result<String, String> {
    if bytes.len() % width != 0 {
        return Err(format!(
            "output size {} does not fit {width}-byte blocks",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks(width)
        .map(|chunk| render(chunk))
        .collect::<Vec<_>>()
        .join(separator))
}

/// Human-readable rendering of a version-command reply (command 0).
pub fn interpret_version_reply(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let version = bytes[0];
    let uptime = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let flags = bytes[5];
    let free_ram = u16::from_le_bytes([bytes[6], bytes[7]]);
    let info: String = bytes[8..]
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect();
    Some(format!(
        "Arducom slave version: {version}; Uptime: {uptime} ms; Flags: {flags} ({}); Free RAM: {free_ram} bytes; Info: {info}",
        if flags & 1 != 0 { "debug on" } else { "debug off" }
    ))
}
