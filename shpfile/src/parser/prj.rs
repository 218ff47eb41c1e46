//! Parser pour les fichiers .prj (système de coordonnées en WKT)

use std::sync::OnceLock;

use regex::Regex;

use crate::types::Crs;

fn authority_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).expect("valid regex")
    })
}

fn utm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)WGS_1984_UTM_Zone_(\d{1,2})([NS])").expect("valid regex"))
}

fn pulkovo_gk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Pulkovo_1942_GK_Zone_(\d{1,2})\b").expect("valid regex"))
}

/// Détermine le CRS déclaré par un .prj ; `None` si le contenu est vide
pub fn parse(wkt: &str) -> Option<Crs> {
    let wkt = wkt.trim();
    if wkt.is_empty() {
        return None;
    }

    if let Some(code) = top_level_authority(wkt) {
        return Some(Crs::Epsg(code));
    }

    // Variantes ESRI sans AUTHORITY
    let upper = wkt.to_ascii_uppercase();
    if upper.starts_with("GEOGCS[") && (upper.contains("WGS_1984") || upper.contains("WGS 84")) {
        return Some(Crs::Epsg(4326));
    }
    if upper.contains("AUXILIARY_SPHERE")
        || upper.contains("PSEUDO_MERCATOR")
        || upper.contains("PSEUDO-MERCATOR")
    {
        return Some(Crs::Epsg(3857));
    }
    if let Some(c) = utm_re().captures(wkt) {
        if let Ok(zone) = c[1].parse::<u32>() {
            let base = if c[2].eq_ignore_ascii_case("N") { 32600 } else { 32700 };
            return Some(Crs::Epsg(base + zone));
        }
    }
    if let Some(c) = pulkovo_gk_re().captures(wkt) {
        if let Ok(zone) = c[1].parse::<u32>() {
            if (2..=32).contains(&zone) {
                return Some(Crs::Epsg(28400 + zone));
            }
        }
    }

    Some(Crs::Wkt(wkt.to_string()))
}

/// Code EPSG de l'AUTHORITY enfant direct du nœud racine
///
/// Les AUTHORITY imbriquées (DATUM, GEOGCS, UNIT…) ne désignent pas le CRS.
fn top_level_authority(wkt: &str) -> Option<u32> {
    authority_re()
        .captures_iter(wkt)
        .filter(|c| c.get(0).map_or(false, |m| bracket_depth(&wkt[..m.start()]) == 1))
        .last()
        .and_then(|c| c[1].parse::<u32>().ok())
}

/// Profondeur de crochets à la fin de `prefix`, hors chaînes entre guillemets
fn bracket_depth(prefix: &str) -> i32 {
    let mut depth = 0;
    let mut quoted = false;
    for b in prefix.bytes() {
        match b {
            b'"' => quoted = !quoted,
            b'[' | b'(' if !quoted => depth += 1,
            b']' | b')' if !quoted => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// WKT ESRI écrit dans un .prj pour un CRS donné
pub fn to_wkt(crs: &Crs) -> Option<String> {
    match crs {
        Crs::Epsg(4326) => Some(
            r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#
                .to_string(),
        ),
        Crs::Epsg(3857) => Some(
            r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Mercator_Auxiliary_Sphere"],PARAMETER["False_Easting",0.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",0.0],PARAMETER["Standard_Parallel_1",0.0],PARAMETER["Auxiliary_Sphere_Type",0.0],UNIT["Meter",1.0]]"#
                .to_string(),
        ),
        Crs::Epsg(code) => Some(format!(
            r#"LOCAL_CS["EPSG:{code}",AUTHORITY["EPSG","{code}"]]"#
        )),
        Crs::Wkt(wkt) => Some(wkt.clone()),
        Crs::Proj4(_) => None,
    }
}
