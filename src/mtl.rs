use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Name bound to geometry that declares no material of its own.
pub const FALLBACK_MATERIAL: &str = "__default";

/// Surface appearance properties parsed from an MTL definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub shininess: f32,
    pub opacity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diffuse_map: Option<String>,
}

impl Material {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ambient: Vec3::splat(0.2),
            diffuse: Vec3::splat(0.8),
            specular: Vec3::ZERO,
            shininess: 0.0,
            opacity: 1.0,
            diffuse_map: None,
        }
    }

    /// Plain white material bound to geometry without any `usemtl` group.
    pub fn fallback() -> Self {
        Self {
            diffuse: Vec3::ONE,
            ..Self::named(FALLBACK_MATERIAL)
        }
    }
}

/// Parsed material definitions keyed by material name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialSet {
    materials: HashMap<String, Material>,
}

impl MaterialSet {
    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.materials.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.materials.keys().map(String::as_str)
    }
}

/// Parses an MTL file from memory into a [`MaterialSet`].
///
/// Only the directives the renderer consumes are interpreted
/// (`newmtl`, `Ka`, `Kd`, `Ks`, `Ns`, `d`/`Tr`, `map_Kd`); everything
/// else is skipped the way the reference loaders skip it.
pub fn load_mtl_from_str(data: &str) -> Result<MaterialSet> {
    let mut materials: HashMap<String, Material> = HashMap::new();
    let mut current: Option<Material> = None;

    for (line_no, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };

        if tag == "newmtl" {
            if let Some(done) = current.take() {
                materials.insert(done.name.clone(), done);
            }
            let name = parts
                .next()
                .ok_or_else(|| anyhow!("newmtl without a name on line {}", line_no + 1))?;
            current = Some(Material::named(name));
            continue;
        }

        let Some(material) = current.as_mut() else {
            return Err(anyhow!(
                "material property before any newmtl on line {}",
                line_no + 1
            ));
        };

        match tag {
            "Ka" => {
                material.ambient = parse_color(parts)
                    .with_context(|| format!("invalid Ka on line {}", line_no + 1))?
            }
            "Kd" => {
                material.diffuse = parse_color(parts)
                    .with_context(|| format!("invalid Kd on line {}", line_no + 1))?
            }
            "Ks" => {
                material.specular = parse_color(parts)
                    .with_context(|| format!("invalid Ks on line {}", line_no + 1))?
            }
            "Ns" => {
                material.shininess = parse_scalar(parts)
                    .with_context(|| format!("invalid Ns on line {}", line_no + 1))?
            }
            "d" => {
                material.opacity = parse_scalar(parts)
                    .with_context(|| format!("invalid d on line {}", line_no + 1))?
            }
            // Tr is inverted transparency
            "Tr" => {
                let tr = parse_scalar(parts)
                    .with_context(|| format!("invalid Tr on line {}", line_no + 1))?;
                material.opacity = 1.0 - tr;
            }
            "map_Kd" => {
                material.diffuse_map = parts.next().map(|path| path.to_string());
            }
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        materials.insert(done.name.clone(), done);
    }

    if materials.is_empty() {
        return Err(anyhow!("MTL file does not define any materials"));
    }

    Ok(MaterialSet { materials })
}

fn parse_color<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let r = parts
        .next()
        .ok_or_else(|| anyhow!("missing color component"))?
        .parse::<f32>()?;
    let g = parts
        .next()
        .ok_or_else(|| anyhow!("missing color component"))?
        .parse::<f32>()?;
    let b = parts
        .next()
        .ok_or_else(|| anyhow!("missing color component"))?
        .parse::<f32>()?;
    Ok(Vec3::new(r, g, b))
}

fn parse_scalar<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<f32> {
    Ok(parts
        .next()
        .ok_or_else(|| anyhow!("missing scalar value"))?
        .parse::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_material() {
        let mtl = "newmtl red\nKd 1.0 0.0 0.0\nNs 32\n";
        let set = load_mtl_from_str(mtl).unwrap();
        assert_eq!(set.len(), 1);
        let red = set.get("red").unwrap();
        assert_eq!(red.diffuse, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(red.shininess, 32.0);
        assert_eq!(red.opacity, 1.0);
    }

    #[test]
    fn parses_multiple_materials_and_maps() {
        let mtl = concat!(
            "# exported\n",
            "newmtl body\n",
            "Ka 0.1 0.1 0.1\n",
            "Kd 0.5 0.5 0.9\n",
            "Ks 1 1 1\n",
            "map_Kd body_diffuse.png\n",
            "\n",
            "newmtl glass\n",
            "Kd 0.9 0.9 1.0\n",
            "d 0.25\n",
        );
        let set = load_mtl_from_str(mtl).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.get("body").unwrap().diffuse_map.as_deref(),
            Some("body_diffuse.png")
        );
        assert!((set.get("glass").unwrap().opacity - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn tr_is_inverted_opacity() {
        let set = load_mtl_from_str("newmtl fog\nTr 0.75\n").unwrap();
        assert!((set.get("fog").unwrap().opacity - 0.25).abs() < 1e-6);
    }

    #[test]
    fn property_before_newmtl_is_an_error() {
        assert!(load_mtl_from_str("Kd 1 0 0\n").is_err());
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(load_mtl_from_str("# nothing here\n").is_err());
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let set = load_mtl_from_str("newmtl m\nillum 2\nNi 1.45\nKd 0 1 0\n").unwrap();
        assert_eq!(set.get("m").unwrap().diffuse, Vec3::new(0.0, 1.0, 0.0));
    }
}
