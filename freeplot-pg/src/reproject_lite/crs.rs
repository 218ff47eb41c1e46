//! Résolution d'un CRS (EPSG, PROJ.4, WKT) en projection pure Rust

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use shpfile::Crs;

use super::{Datum, Ellipsoid, Helmert, Projection, TransverseMercator};

pub(super) fn resolve(crs: &Crs) -> Result<Projection> {
    match crs {
        Crs::Epsg(code) => from_epsg(*code),
        Crs::Proj4(def) => from_proj4(def),
        Crs::Wkt(wkt) => from_wkt(wkt),
    }
}

fn from_epsg(code: u32) -> Result<Projection> {
    match code {
        4326 => Ok(Projection::Geographic(Datum::WGS84)),
        4284 => Ok(Projection::Geographic(Datum::PULKOVO_1942)),
        3857 | 900913 => Ok(Projection::WebMercator),
        32601..=32660 => Ok(Projection::TransverseMercator(TransverseMercator::utm(
            code - 32600,
            false,
        ))),
        32701..=32760 => Ok(Projection::TransverseMercator(TransverseMercator::utm(
            code - 32700,
            true,
        ))),
        28402..=28432 => Ok(Projection::TransverseMercator(
            TransverseMercator::gauss_kruger(code - 28400),
        )),
        _ => bail!(
            "EPSG:{} non supporté par reproject_lite (4326, 4284, 3857, 326xx, 327xx, 28402-28432)",
            code
        ),
    }
}

/// `+proj=tmerc +lat_0=... +ellps=krass +towgs84=...`
fn from_proj4(def: &str) -> Result<Projection> {
    let params: HashMap<&str, Option<&str>> = def
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('+'))
        .map(|token| match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        })
        .collect();

    let number = |key: &str| -> Result<Option<f64>> {
        match params.get(key).copied().flatten() {
            Some(v) => v
                .parse::<f64>()
                .map(Some)
                .with_context(|| format!("Paramètre +{} invalide: {}", key, v)),
            None => Ok(None),
        }
    };

    if let Some(Some(units)) = params.get("units") {
        if *units != "m" {
            bail!("Unité {} non supportée (mètres uniquement)", units);
        }
    }

    let ellipsoid = match (params.get("ellps").copied().flatten(), number("a")?) {
        (Some(name), _) => Ellipsoid::from_name(name)
            .with_context(|| format!("Ellipsoïde inconnu: {}", name))?,
        (None, Some(a)) => match (number("rf")?, number("b")?) {
            (Some(rf), _) => Ellipsoid::from_inverse_flattening(a, rf),
            (None, Some(b)) => Ellipsoid { a, f: (a - b) / a },
            (None, None) => Ellipsoid { a, f: 0.0 },
        },
        (None, None) => match params.get("datum").copied().flatten() {
            Some(d) if d.eq_ignore_ascii_case("WGS84") => Ellipsoid::WGS84,
            Some(d) => bail!("Datum {} non supporté", d),
            None => Ellipsoid::WGS84,
        },
    };

    let to_wgs84 = match params.get("towgs84").copied().flatten() {
        Some(list) => {
            let values = list
                .split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("+towgs84 invalide: {}", list))?;
            Some(
                Helmert::from_towgs84(&values)
                    .with_context(|| format!("+towgs84 attend 3 ou 7 valeurs: {}", list))?,
            )
        }
        None => None,
    };
    let datum = Datum {
        ellipsoid,
        to_wgs84,
    };

    let proj = params
        .get("proj")
        .copied()
        .flatten()
        .context("Paramètre +proj manquant")?;

    match proj {
        "longlat" | "latlong" | "lonlat" | "latlon" => Ok(Projection::Geographic(datum)),
        "tmerc" => Ok(Projection::TransverseMercator(TransverseMercator {
            lat0: number("lat_0")?.unwrap_or(0.0),
            lon0: number("lon_0")?.unwrap_or(0.0),
            k0: match number("k_0")? {
                Some(k) => k,
                None => number("k")?.unwrap_or(1.0),
            },
            x0: number("x_0")?.unwrap_or(0.0),
            y0: number("y_0")?.unwrap_or(0.0),
            datum,
        })),
        "utm" => {
            let zone = number("zone")?.context("+proj=utm sans +zone")?;
            let mut tm = TransverseMercator::utm(zone as u32, params.contains_key("south"));
            tm.datum = datum;
            Ok(Projection::TransverseMercator(tm))
        }
        "merc" if ellipsoid.f == 0.0 && ellipsoid.a == Ellipsoid::WGS84.a => {
            Ok(Projection::WebMercator)
        }
        other => bail!("Projection +proj={} non supportée par reproject_lite", other),
    }
}

fn projection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)PROJECTION\[\s*"([^"]+)""#).expect("valid regex"))
}

fn parameter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)PARAMETER\[\s*"([^"]+)"\s*,\s*([-+0-9.eE]+)\s*\]"#).expect("valid regex")
    })
}

fn spheroid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:SPHEROID|ELLIPSOID)\[\s*"([^"]*)"\s*,\s*([-+0-9.eE]+)\s*,\s*([-+0-9.eE]+)"#)
            .expect("valid regex")
    })
}

fn towgs84_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)TOWGS84\[([^\]]+)\]").expect("valid regex"))
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)UNIT\[\s*"([^"]*)"\s*,\s*([-+0-9.eE]+)"#).expect("valid regex")
    })
}

/// WKT1 (OGC ou ESRI) : GEOGCS seul, ou PROJCS Transverse Mercator
fn from_wkt(wkt: &str) -> Result<Projection> {
    let spheroid = spheroid_re()
        .captures(wkt)
        .context("WKT sans SPHEROID")?;
    let a: f64 = spheroid[2].parse().context("Demi-grand axe invalide")?;
    let rf: f64 = spheroid[3].parse().context("Aplatissement invalide")?;
    let ellipsoid = Ellipsoid::from_inverse_flattening(a, rf);

    let to_wgs84 = match towgs84_re().captures(wkt) {
        Some(c) => {
            let values = c[1]
                .split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .context("TOWGS84 invalide")?;
            Some(Helmert::from_towgs84(&values).context("TOWGS84 attend 3 ou 7 valeurs")?)
        }
        // Krassovsky sans TOWGS84 explicite : Pulkovo 1942
        None if ellipsoid == Ellipsoid::KRASSOVSKY => Some(Helmert::PULKOVO_1942),
        None => None,
    };
    let datum = Datum {
        ellipsoid,
        to_wgs84,
    };

    let projection = match projection_re().captures(wkt) {
        Some(c) => c[1].to_ascii_lowercase(),
        None => return Ok(Projection::Geographic(datum)),
    };

    // Le dernier UNIT d'un PROJCS est l'unité linéaire
    if let Some(unit) = unit_re().captures_iter(wkt).last() {
        let factor: f64 = unit[2].parse().context("Facteur d'unité invalide")?;
        if (factor - 1.0).abs() > 1e-12 {
            bail!("Unité linéaire {} non supportée (mètres uniquement)", &unit[1]);
        }
    }

    let params: HashMap<String, f64> = parameter_re()
        .captures_iter(wkt)
        .filter_map(|c| {
            let value = c[2].parse::<f64>().ok()?;
            Some((c[1].to_ascii_lowercase(), value))
        })
        .collect();
    let param = |names: &[&str], default: f64| {
        names
            .iter()
            .find_map(|n| params.get(*n).copied())
            .unwrap_or(default)
    };

    match projection.as_str() {
        "transverse_mercator" | "gauss_kruger" | "transverse mercator" => {
            Ok(Projection::TransverseMercator(TransverseMercator {
                lat0: param(&["latitude_of_origin", "latitude_of_center"], 0.0),
                lon0: param(
                    &["central_meridian", "longitude_of_center", "longitude_of_origin"],
                    0.0,
                ),
                k0: param(&["scale_factor", "scale_factor_at_natural_origin"], 1.0),
                x0: param(&["false_easting"], 0.0),
                y0: param(&["false_northing"], 0.0),
                datum,
            }))
        }
        "mercator_auxiliary_sphere" | "popular_visualisation_pseudo_mercator" => {
            Ok(Projection::WebMercator)
        }
        other => bail!("Projection WKT {} non supportée par reproject_lite", other),
    }
}
