//! Purpose: Track fluid composition through liquid handling operations.
//! Exports: `Composition`, `combine`, `seed_components`, `trough_component_names`.
//! Role: Pure mixing math used by the labware ledger; no ledger access.
//! Invariants: Fractions of a mixed well sum to 1 over the key union.
//! Invariants: Mixing assumes instantaneous, perfect homogenization.
use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind};
use crate::core::grid::Matrix;

/// Relative composition of one well: component name to volume fraction.
pub type Composition = BTreeMap<String, f64>;

/// Composition of the liquid created by mixing volume `v_a` of composition
/// `a` with volume `v_b` of composition `b`.
///
/// Works on the union of component keys; a total volume of zero keeps the
/// never-filled state (empty composition).
pub fn combine(v_a: f64, a: &Composition, v_b: f64, b: &Composition) -> Composition {
    let total = v_a + v_b;
    if total == 0.0 {
        return Composition::new();
    }
    // volumetric amounts over the key union, then back to relative fractions
    let mut amounts: BTreeMap<String, f64> = BTreeMap::new();
    for (k, f) in a {
        *amounts.entry(k.clone()).or_insert(0.0) += f * v_a;
    }
    for (k, f) in b {
        *amounts.entry(k.clone()).or_insert(0.0) += f * v_b;
    }
    amounts.into_iter().map(|(k, v)| (k, v / total)).collect()
}

/// Builds the initial component matrices for a labware.
///
/// Every non-empty well is attributed 100% to one component: an explicitly
/// named one, or the default `"{name}.{well}"` (just `"{name}"` for
/// single-well labware). Naming an empty or unknown well is an error.
pub fn seed_components(
    name: &str,
    real_wells: &[Vec<String>],
    component_names: &BTreeMap<String, String>,
    initial_volumes: &Matrix,
) -> Result<BTreeMap<String, Matrix>, Error> {
    let rows = real_wells.len();
    let columns = real_wells.first().map(Vec::len).unwrap_or(0);
    let is_multiwell = rows * columns > 1;

    for key in component_names.keys() {
        if !real_wells.iter().any(|row| row.iter().any(|w| w == key)) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid component name key: {key}"))
                .with_labware(name));
        }
    }

    let mut composition: BTreeMap<String, Matrix> = BTreeMap::new();
    for (r, row) in real_wells.iter().enumerate() {
        for (c, well) in row.iter().enumerate() {
            if initial_volumes.get(r, c) == 0.0 {
                if let Some(cname) = component_names.get(well) {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!(
                            "component name '{cname}' given for {name}.{well}, but its initial volume is 0"
                        ))
                        .with_labware(name)
                        .with_well(well.clone()));
                }
                continue;
            }
            let cname = component_names
                .get(well)
                .cloned()
                .unwrap_or_else(|| {
                    if is_multiwell {
                        format!("{name}.{well}")
                    } else {
                        name.to_string()
                    }
                });
            composition
                .entry(cname)
                .or_insert_with(|| Matrix::zeros(rows, columns))
                .set(r, c, 1.0);
        }
    }
    Ok(composition)
}

/// Expands per-column trough names into a full well-to-component mapping.
///
/// Troughs default to `"{name}.column_NN"` instead of the per-well pattern,
/// or plain `"{name}"` for single-column troughs.
pub fn trough_component_names(
    name: &str,
    columns: usize,
    column_names: &[Option<String>],
    initial_volumes: &[f64],
) -> Result<BTreeMap<String, String>, Error> {
    if column_names.len() != columns {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "{} column names given for {columns} columns",
                column_names.len()
            ))
            .with_labware(name));
    }
    if initial_volumes.len() != columns {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "{} initial volumes given for {columns} columns",
                initial_volumes.len()
            ))
            .with_labware(name));
    }

    let mut component_names = BTreeMap::new();
    for (c, (cname, volume)) in column_names.iter().zip(initial_volumes).enumerate() {
        if cname.is_some() && *volume == 0.0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("empty trough columns must be unnamed")
                .with_labware(name));
        }
        let resolved = match cname {
            Some(cname) => cname.clone(),
            None if *volume > 0.0 => {
                if columns > 1 {
                    format!("{name}.column_{:02}", c + 1)
                } else {
                    name.to_string()
                }
            }
            None => continue,
        };
        component_names.insert(format!("A{:02}", c + 1), resolved);
    }
    Ok(component_names)
}

#[cfg(test)]
mod tests {
    use super::{combine, seed_components, trough_component_names, Composition};
    use crate::core::error::ErrorKind;
    use crate::core::grid::Matrix;
    use std::collections::BTreeMap;

    fn comp(entries: &[(&str, f64)]) -> Composition {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn combining_equal_volumes_averages_fractions() {
        let a = comp(&[("water", 1.0)]);
        let b = comp(&[("salt", 1.0)]);
        let mixed = combine(100.0, &a, 100.0, &b);
        assert_eq!(mixed, comp(&[("water", 0.5), ("salt", 0.5)]));
    }

    #[test]
    fn combining_weights_by_volume() {
        let a = comp(&[("water", 0.5), ("salt", 0.5)]);
        let b = comp(&[("water", 1.0)]);
        let mixed = combine(100.0, &a, 300.0, &b);
        assert_eq!(mixed, comp(&[("water", 0.875), ("salt", 0.125)]));
        let total: f64 = mixed.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_total_volume_stays_unfilled() {
        let mixed = combine(0.0, &Composition::new(), 0.0, &comp(&[("water", 1.0)]));
        assert!(mixed.is_empty());
    }

    #[test]
    fn default_names_are_per_well() {
        let wells = vec![
            vec!["A01".to_string(), "A02".to_string()],
            vec!["B01".to_string(), "B02".to_string()],
        ];
        let mut volumes = Matrix::zeros(2, 2);
        volumes.set(0, 0, 100.0);
        volumes.set(1, 1, 50.0);
        let composition =
            seed_components("plate", &wells, &BTreeMap::new(), &volumes).expect("seed");
        assert_eq!(
            composition.keys().cloned().collect::<Vec<_>>(),
            vec!["plate.A01".to_string(), "plate.B02".to_string()]
        );
        assert_eq!(composition["plate.A01"].get(0, 0), 1.0);
        assert_eq!(composition["plate.A01"].get(1, 1), 0.0);
    }

    #[test]
    fn single_well_labware_uses_its_own_name() {
        let wells = vec![vec!["A01".to_string()]];
        let volumes = Matrix::filled(1, 1, 20.0);
        let composition =
            seed_components("water", &wells, &BTreeMap::new(), &volumes).expect("seed");
        assert_eq!(composition.keys().cloned().collect::<Vec<_>>(), vec!["water"]);
    }

    #[test]
    fn naming_an_empty_well_is_rejected() {
        let wells = vec![vec!["A01".to_string()]];
        let volumes = Matrix::zeros(1, 1);
        let names = BTreeMap::from([("A01".to_string(), "glucose".to_string())]);
        let err = seed_components("plate", &wells, &names, &volumes).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn naming_an_unknown_well_is_rejected() {
        let wells = vec![vec!["A01".to_string()]];
        let volumes = Matrix::filled(1, 1, 10.0);
        let names = BTreeMap::from([("Z99".to_string(), "glucose".to_string())]);
        let err = seed_components("plate", &wells, &names, &volumes).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn trough_names_default_to_columns() {
        let names = trough_component_names(
            "stocks",
            3,
            &[None, Some("feed".to_string()), None],
            &[2000.0, 1000.0, 0.0],
        )
        .expect("names");
        assert_eq!(names.get("A01").map(String::as_str), Some("stocks.column_01"));
        assert_eq!(names.get("A02").map(String::as_str), Some("feed"));
        assert_eq!(names.get("A03"), None);
    }

    #[test]
    fn trough_name_for_empty_column_is_rejected() {
        let err = trough_component_names("stocks", 1, &[Some("feed".to_string())], &[0.0])
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
