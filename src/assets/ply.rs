//! Stanford PLY reader for scanned rooms and point clouds.
//!
//! Reads ASCII and binary (either endianness) files. Vertex positions are
//! required; normals, `red/green/blue[/alpha]` colours and a face list are
//! picked up when present. Any other element is parsed and skipped.

use crate::assets::LoadedObject;
use crate::materials::VERTEX_COLOR_ATTRIBUTE;
use crate::scene::{MeshData, Transform};

#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    #[error("not a PLY file")]
    MissingMagic,
    #[error("malformed header: {0}")]
    Header(String),
    #[error("unexpected end of data in element '{0}'")]
    UnexpectedEof(String),
    #[error("invalid value '{value}' in element '{element}'")]
    BadValue { element: String, value: String },
    #[error("vertex element lacks '{0}' property")]
    MissingProperty(&'static str),
    #[error("face {face} references vertex {index} of {count}")]
    IndexOutOfRange { face: usize, index: i64, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }

    /// Divisor that maps an integer colour channel onto 0..=1.
    fn color_scale(self) -> f64 {
        match self {
            Scalar::U8 | Scalar::I8 => 255.0,
            Scalar::U16 | Scalar::I16 => 65535.0,
            Scalar::U32 | Scalar::I32 => u32::MAX as f64,
            Scalar::F32 | Scalar::F64 => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

impl Property {
    fn name(&self) -> &str {
        match self {
            Property::Scalar { name, .. } | Property::List { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

impl Element {
    /// Fewest body bytes one row can occupy.
    fn min_row_bytes(&self, format: Format) -> usize {
        self.properties
            .iter()
            .map(|property| match (format, property) {
                // One digit per value; separators are not counted.
                (Format::Ascii, _) => 1,
                (_, Property::Scalar { ty, .. }) => ty.size(),
                (_, Property::List { count, .. }) => count.size(),
            })
            .sum()
    }

    fn scalar_index(&self, name: &str) -> Option<(usize, Scalar)> {
        self.properties
            .iter()
            .enumerate()
            .find_map(|(index, property)| match property {
                Property::Scalar { name: n, ty } if n == name => Some((index, *ty)),
                _ => None,
            })
    }
}

struct Header {
    format: Format,
    elements: Vec<Element>,
    body_offset: usize,
}

fn parse_header(bytes: &[u8]) -> Result<Header, PlyError> {
    if !bytes.starts_with(b"ply") {
        return Err(PlyError::MissingMagic);
    }
    let end_marker = b"end_header";
    let marker_at = bytes
        .windows(end_marker.len())
        .position(|window| window == end_marker)
        .ok_or_else(|| PlyError::Header("missing end_header".to_string()))?;
    let mut body_offset = marker_at + end_marker.len();
    if bytes.get(body_offset) == Some(&b'\r') {
        body_offset += 1;
    }
    if bytes.get(body_offset) == Some(&b'\n') {
        body_offset += 1;
    }

    let text = String::from_utf8_lossy(&bytes[..marker_at]);
    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in text.lines().skip(1) {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("format") => {
                format = Some(match words.next() {
                    Some("ascii") => Format::Ascii,
                    Some("binary_little_endian") => Format::BinaryLittleEndian,
                    Some("binary_big_endian") => Format::BinaryBigEndian,
                    other => {
                        return Err(PlyError::Header(format!("unknown format {:?}", other)));
                    }
                });
            }
            Some("element") => {
                let name = words
                    .next()
                    .ok_or_else(|| PlyError::Header("element without name".to_string()))?;
                let count = words
                    .next()
                    .and_then(|count| count.parse::<usize>().ok())
                    .ok_or_else(|| PlyError::Header(format!("element '{name}' without count")))?;
                elements.push(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| PlyError::Header("property before element".to_string()))?;
                let parts: Vec<&str> = words.collect();
                let property = match parts.as_slice() {
                    ["list", count, item, name] => Property::List {
                        name: name.to_string(),
                        count: parse_scalar(count)?,
                        item: parse_scalar(item)?,
                    },
                    [ty, name] => Property::Scalar {
                        name: name.to_string(),
                        ty: parse_scalar(ty)?,
                    },
                    _ => return Err(PlyError::Header(format!("bad property line '{line}'"))),
                };
                element.properties.push(property);
            }
            Some("comment") | Some("obj_info") | None => {}
            Some(other) => {
                return Err(PlyError::Header(format!("unknown keyword '{other}'")));
            }
        }
    }

    Ok(Header {
        format: format.ok_or_else(|| PlyError::Header("missing format line".to_string()))?,
        elements,
        body_offset,
    })
}

fn parse_scalar(name: &str) -> Result<Scalar, PlyError> {
    Scalar::parse(name).ok_or_else(|| PlyError::Header(format!("unknown type '{name}'")))
}

enum ValueReader<'a> {
    Ascii(std::str::SplitAsciiWhitespace<'a>),
    Binary {
        bytes: &'a [u8],
        position: usize,
        big_endian: bool,
    },
}

impl<'a> ValueReader<'a> {
    fn read(&mut self, ty: Scalar, element: &str) -> Result<f64, PlyError> {
        match self {
            ValueReader::Ascii(tokens) => {
                let token = tokens
                    .next()
                    .ok_or_else(|| PlyError::UnexpectedEof(element.to_string()))?;
                token.parse::<f64>().map_err(|_| PlyError::BadValue {
                    element: element.to_string(),
                    value: token.to_string(),
                })
            }
            ValueReader::Binary {
                bytes,
                position,
                big_endian,
            } => {
                let size = ty.size();
                let raw = bytes
                    .get(*position..*position + size)
                    .ok_or_else(|| PlyError::UnexpectedEof(element.to_string()))?;
                *position += size;
                let mut buf = [0u8; 8];
                buf[..size].copy_from_slice(raw);
                if *big_endian {
                    buf[..size].reverse();
                }
                Ok(match ty {
                    Scalar::I8 => i8::from_le_bytes([buf[0]]) as f64,
                    Scalar::U8 => buf[0] as f64,
                    Scalar::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
                    Scalar::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
                    Scalar::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
                    Scalar::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
                    Scalar::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
                    Scalar::F64 => f64::from_le_bytes(buf),
                })
            }
        }
    }
}

/// One parsed element row: scalar values by property position, plus list values.
struct Row {
    scalars: Vec<f64>,
    lists: Vec<Vec<f64>>,
}

fn read_row(reader: &mut ValueReader<'_>, element: &Element) -> Result<Row, PlyError> {
    let mut row = Row {
        scalars: Vec::with_capacity(element.properties.len()),
        lists: Vec::new(),
    };
    for property in &element.properties {
        match property {
            Property::Scalar { ty, .. } => row.scalars.push(reader.read(*ty, &element.name)?),
            Property::List { count, item, .. } => {
                let len = reader.read(*count, &element.name)?;
                if len < 0.0 || len.fract() != 0.0 {
                    return Err(PlyError::BadValue {
                        element: element.name.clone(),
                        value: len.to_string(),
                    });
                }
                let values = (0..len as usize)
                    .map(|_| reader.read(*item, &element.name))
                    .collect::<Result<Vec<_>, _>>()?;
                // Keep scalar positions aligned with property positions.
                row.scalars.push(f64::NAN);
                row.lists.push(values);
            }
        }
    }
    Ok(row)
}

/// Rejects headers whose element counts cannot fit in `body_len` bytes.
fn check_counts(header: &Header, body_len: usize) -> Result<(), PlyError> {
    let mut needed = 0usize;
    for element in &header.elements {
        let row = element.min_row_bytes(header.format);
        needed = row
            .checked_mul(element.count)
            .and_then(|bytes| bytes.checked_add(needed))
            .filter(|&total| total <= body_len)
            .ok_or_else(|| {
                PlyError::Header(format!(
                    "element '{}' declares {} rows but the body holds {} bytes",
                    element.name, element.count, body_len
                ))
            })?;
        if row == 0 && element.count > 0 {
            return Err(PlyError::Header(format!(
                "element '{}' has rows but no properties",
                element.name
            )));
        }
    }
    Ok(())
}

/// Parses PLY bytes into a single mesh named `name`.
pub fn parse_ply(bytes: &[u8], name: &str) -> Result<MeshData, PlyError> {
    let header = parse_header(bytes)?;
    let body = &bytes[header.body_offset..];
    check_counts(&header, body.len())?;
    let mut reader = match header.format {
        Format::Ascii => ValueReader::Ascii(
            std::str::from_utf8(body)
                .map_err(|_| PlyError::Header("ASCII body is not UTF-8".to_string()))?
                .split_ascii_whitespace(),
        ),
        Format::BinaryLittleEndian | Format::BinaryBigEndian => ValueReader::Binary {
            bytes: body,
            position: 0,
            big_endian: header.format == Format::BinaryBigEndian,
        },
    };

    let mut mesh = MeshData::new(name);
    let mut colors: Vec<[f32; 4]> = Vec::new();
    let mut faces: Vec<Vec<f64>> = Vec::new();

    for element in &header.elements {
        match element.name.as_str() {
            "vertex" => {
                let x = element.scalar_index("x").ok_or(PlyError::MissingProperty("x"))?;
                let y = element.scalar_index("y").ok_or(PlyError::MissingProperty("y"))?;
                let z = element.scalar_index("z").ok_or(PlyError::MissingProperty("z"))?;
                let normal = match (
                    element.scalar_index("nx"),
                    element.scalar_index("ny"),
                    element.scalar_index("nz"),
                ) {
                    (Some(nx), Some(ny), Some(nz)) => Some([nx.0, ny.0, nz.0]),
                    _ => None,
                };
                let color = match (
                    element.scalar_index("red"),
                    element.scalar_index("green"),
                    element.scalar_index("blue"),
                ) {
                    (Some(r), Some(g), Some(b)) => Some((r, g, b, element.scalar_index("alpha"))),
                    _ => None,
                };

                mesh.positions.reserve(element.count);
                for _ in 0..element.count {
                    let row = read_row(&mut reader, element)?;
                    let s = &row.scalars;
                    mesh.positions
                        .push([s[x.0] as f32, s[y.0] as f32, s[z.0] as f32]);
                    if let Some([nx, ny, nz]) = normal {
                        mesh.normals.push([s[nx] as f32, s[ny] as f32, s[nz] as f32]);
                    }
                    if let Some((r, g, b, a)) = color {
                        let channel = |(index, ty): (usize, Scalar)| {
                            (s[index] / ty.color_scale()).clamp(0.0, 1.0) as f32
                        };
                        colors.push([
                            channel(r),
                            channel(g),
                            channel(b),
                            a.map(channel).unwrap_or(1.0),
                        ]);
                    }
                }
            }
            "face" => {
                let list = element
                    .properties
                    .iter()
                    .position(|p| {
                        matches!(p, Property::List { .. })
                            && matches!(p.name(), "vertex_indices" | "vertex_index")
                    })
                    .ok_or(PlyError::MissingProperty("vertex_indices"))?;
                let list_slot = element.properties[..list]
                    .iter()
                    .filter(|p| matches!(p, Property::List { .. }))
                    .count();
                for _ in 0..element.count {
                    let mut row = read_row(&mut reader, element)?;
                    faces.push(std::mem::take(&mut row.lists[list_slot]));
                }
            }
            _ => {
                for _ in 0..element.count {
                    read_row(&mut reader, element)?;
                }
            }
        }
    }

    let vertex_count = mesh.positions.len();
    for (face, indices) in faces.iter().enumerate() {
        let indices = indices
            .iter()
            .map(|&index| {
                if !index.is_finite() || index.fract() != 0.0 {
                    Err(PlyError::BadValue {
                        element: "face".to_string(),
                        value: index.to_string(),
                    })
                } else if index < 0.0 || index as usize >= vertex_count {
                    Err(PlyError::IndexOutOfRange {
                        face,
                        index: index as i64,
                        count: vertex_count,
                    })
                } else {
                    Ok(index as u32)
                }
            })
            .collect::<Result<Vec<u32>, _>>()?;
        // Fan-triangulate polygons.
        for i in 1..indices.len().saturating_sub(1) {
            mesh.triangles.push([indices[0], indices[i], indices[i + 1]]);
        }
    }

    if !colors.is_empty() {
        mesh.color_attributes
            .insert(VERTEX_COLOR_ATTRIBUTE.to_string(), colors);
    }
    Ok(mesh)
}

/// Loads a PLY file as one object named after the file stem.
pub fn load_ply(path: &std::path::Path) -> Result<Vec<LoadedObject>, String> {
    let bytes = std::fs::read(path).map_err(|err| err.to_string())?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("ply");
    let mesh = parse_ply(&bytes, name).map_err(|err| err.to_string())?;
    log::debug!(
        "PLY '{}': {} vertices, {} triangles, colours: {}",
        name,
        mesh.vertex_count(),
        mesh.triangles.len(),
        mesh.color_attributes.contains_key(VERTEX_COLOR_ATTRIBUTE)
    );
    Ok(vec![LoadedObject {
        name: name.to_string(),
        mesh,
        materials: Vec::new(),
        transform: Transform::IDENTITY,
    }])
}
