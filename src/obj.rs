use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::mtl::{Material, MaterialSet};

/// GPU ready mesh buffers for one material group of an OBJ file.
///
/// Vertices are laid out as `position.xyz` followed by `normal.xyz`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub material: Material,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl SurfaceMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 6
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// A parsed OBJ model: one surface per material group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjModel {
    pub surfaces: Vec<SurfaceMesh>,
}

impl ObjModel {
    pub fn triangle_count(&self) -> usize {
        self.surfaces.iter().map(SurfaceMesh::triangle_count).sum()
    }
}

/// Parses an OBJ file from memory, binding each `usemtl` group to the
/// matching entry of `materials`.
///
/// A face group that names a material absent from the set is an error;
/// geometry that never issues `usemtl` is bound to [`Material::fallback`].
pub fn load_obj_from_str(data: &str, materials: &MaterialSet) -> Result<ObjModel> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();

    // Face lists per material name, in first-use order.
    let mut groups: Vec<(Option<String>, Vec<[FaceIndex; 3]>)> = Vec::new();
    let mut group_lookup: HashMap<Option<String>, usize> = HashMap::new();
    let mut current_group: Option<usize> = None;

    for (line_no, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        match tag {
            "v" => positions.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid vertex on line {}", line_no + 1))?,
            ),
            "vn" => normals.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid normal on line {}", line_no + 1))?,
            ),
            "usemtl" => {
                let name = parts
                    .next()
                    .ok_or_else(|| anyhow!("usemtl without a name on line {}", line_no + 1))?
                    .to_string();
                current_group = Some(group_index(&mut groups, &mut group_lookup, Some(name)));
            }
            "f" => {
                let polygon = parse_face(parts)
                    .with_context(|| format!("invalid face on line {}", line_no + 1))?;
                let index = match current_group {
                    Some(index) => index,
                    None => {
                        let index = group_index(&mut groups, &mut group_lookup, None);
                        current_group = Some(index);
                        index
                    }
                };
                triangulate_face(&polygon, &mut groups[index].1);
            }
            // mtllib is informational here: the loader decides which
            // material file is fetched, not the geometry file.
            _ => {}
        }
    }

    if positions.is_empty() {
        return Err(anyhow!("OBJ file does not define any vertices"));
    }

    let mut surfaces = Vec::with_capacity(groups.len());
    for (material_name, faces) in &groups {
        if faces.is_empty() {
            continue;
        }
        let material = match material_name {
            Some(name) => materials
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("geometry references unknown material \"{name}\""))?,
            None => Material::fallback(),
        };
        let mut surface = build_surface(material, &positions, &normals, faces)?;
        if needs_normals(&surface.vertices) {
            compute_normals(&mut surface);
        }
        surfaces.push(surface);
    }

    if surfaces.is_empty() {
        return Err(anyhow!("OBJ file does not define any faces"));
    }

    Ok(ObjModel { surfaces })
}

fn group_index(
    groups: &mut Vec<(Option<String>, Vec<[FaceIndex; 3]>)>,
    lookup: &mut HashMap<Option<String>, usize>,
    name: Option<String>,
) -> usize {
    if let Some(&index) = lookup.get(&name) {
        return index;
    }
    groups.push((name.clone(), Vec::new()));
    let index = groups.len() - 1;
    lookup.insert(name, index);
    index
}

fn parse_vec3<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let x = parts
        .next()
        .ok_or_else(|| anyhow!("missing vector component"))?
        .parse::<f32>()?;
    let y = parts
        .next()
        .ok_or_else(|| anyhow!("missing vector component"))?
        .parse::<f32>()?;
    let z = parts
        .next()
        .ok_or_else(|| anyhow!("missing vector component"))?
        .parse::<f32>()?;
    Ok(Vec3::new(x, y, z))
}

fn parse_face<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec<FaceIndex>> {
    let mut indices = Vec::new();
    for part in parts {
        let mut segments = part.split('/');
        let vi = segments
            .next()
            .ok_or_else(|| anyhow!("missing vertex index"))?
            .parse::<i32>()?;
        let vt = segments
            .next()
            .map(|s| {
                if s.is_empty() {
                    0
                } else {
                    s.parse::<i32>().unwrap_or(0)
                }
            })
            .unwrap_or(0);
        let vn = segments
            .next()
            .map(|s| {
                if s.is_empty() {
                    0
                } else {
                    s.parse::<i32>().unwrap_or(0)
                }
            })
            .unwrap_or(0);
        indices.push(FaceIndex { v: vi, vn, _vt: vt });
    }
    if indices.len() < 3 {
        return Err(anyhow!("faces must reference at least 3 vertices"));
    }
    Ok(indices)
}

fn triangulate_face(polygon: &[FaceIndex], faces: &mut Vec<[FaceIndex; 3]>) {
    if polygon.len() < 3 {
        return;
    }
    for i in 1..(polygon.len() - 1) {
        faces.push([polygon[0], polygon[i], polygon[i + 1]]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    position: usize,
    normal: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct FaceIndex {
    v: i32,
    _vt: i32,
    vn: i32,
}

fn build_surface(
    material: Material,
    positions: &[Vec3],
    normals: &[Vec3],
    faces: &[[FaceIndex; 3]],
) -> Result<SurfaceMesh> {
    let mut lookup: HashMap<Key, u32> = HashMap::new();
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for face in faces {
        for idx in face {
            let pos_index =
                fix_index(idx.v, positions.len()).ok_or_else(|| anyhow!("invalid vertex index"))?;
            let normal_index = fix_index(idx.vn, normals.len());
            let key = Key {
                position: pos_index,
                normal: normal_index,
            };
            let next_index = (vertices.len() / 6) as u32;
            let entry = lookup.entry(key).or_insert_with(|| {
                let position = positions[pos_index];
                vertices.extend_from_slice(&[position.x, position.y, position.z]);
                let normal = normal_index.map(|i| normals[i]).unwrap_or(Vec3::ZERO);
                vertices.extend_from_slice(&[normal.x, normal.y, normal.z]);
                next_index
            });
            indices.push(*entry);
        }
    }

    Ok(SurfaceMesh {
        material,
        vertices,
        indices,
    })
}

fn fix_index(index: i32, len: usize) -> Option<usize> {
    if index > 0 {
        let zero_based = index as usize - 1;
        (zero_based < len).then_some(zero_based)
    } else if index < 0 {
        let abs = (-index) as usize;
        (abs <= len).then_some(len - abs)
    } else {
        None
    }
}

fn needs_normals(vertices: &[f32]) -> bool {
    vertices
        .chunks_exact(6)
        .any(|chunk| chunk[3] == 0.0 && chunk[4] == 0.0 && chunk[5] == 0.0)
}

fn compute_normals(surface: &mut SurfaceMesh) {
    let vertex_count = surface.vertices.len() / 6;
    let mut accum = vec![Vec3::ZERO; vertex_count];

    for triangle in surface.indices.chunks_exact(3) {
        let i0 = triangle[0] as usize;
        let i1 = triangle[1] as usize;
        let i2 = triangle[2] as usize;
        let p0 = Vec3::from_slice(&surface.vertices[i0 * 6..i0 * 6 + 3]);
        let p1 = Vec3::from_slice(&surface.vertices[i1 * 6..i1 * 6 + 3]);
        let p2 = Vec3::from_slice(&surface.vertices[i2 * 6..i2 * 6 + 3]);
        let normal = (p1 - p0).cross(p2 - p0);
        if normal.length_squared() > f32::EPSILON {
            let normal = normal.normalize();
            accum[i0] += normal;
            accum[i1] += normal;
            accum[i2] += normal;
        }
    }

    for (i, normal) in accum.into_iter().enumerate() {
        let normal = normal.normalize_or_zero();
        surface.vertices[i * 6 + 3] = normal.x;
        surface.vertices[i * 6 + 4] = normal.y;
        surface.vertices[i * 6 + 5] = normal.z;
    }
}
