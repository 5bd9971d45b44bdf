// src/agents/jsonstat.rs
//
// Minimal JSON-stat 2.0 reader for the Eurostat dissemination API. Values come
// back as a map from flattened index to number; coordinates are recovered by
// div/mod from the last dimension backward.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct JsonStat {
    pub id: Vec<String>,
    pub size: Vec<usize>,
    pub dimension: HashMap<String, Dimension>,
    #[serde(default)]
    pub value: HashMap<String, Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct Dimension {
    pub category: Category,
}

#[derive(Debug, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub index: HashMap<String, usize>,
}

/// Unflatten `flat` into one coordinate per dimension, last dimension fastest.
pub fn unflatten(flat: usize, sizes: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; sizes.len()];
    let mut remaining = flat;
    for i in (0..sizes.len()).rev() {
        coords[i] = remaining % sizes[i];
        remaining /= sizes[i];
    }
    coords
}

/// One decoded cell: dimension id → category code, plus the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub coords: HashMap<String, String>,
    pub value: f64,
}

impl JsonStat {
    /// Decode every non-null cell. Cells with out-of-range indices or unknown
    /// category positions are silently dropped (the upstream contract makes
    /// them impossible; a truncated response should not take the batch down).
    pub fn observations(&self) -> Vec<Observation> {
        // invert: dimension → (position → code)
        let mut code_by_pos: HashMap<&str, HashMap<usize, &str>> = HashMap::new();
        for dim in &self.id {
            let Some(d) = self.dimension.get(dim) else {
                continue;
            };
            let inv = d
                .category
                .index
                .iter()
                .map(|(code, pos)| (*pos, code.as_str()))
                .collect();
            code_by_pos.insert(dim.as_str(), inv);
        }

        let cell_count: usize = self.size.iter().product();
        let mut out = Vec::with_capacity(self.value.len());
        for (flat_str, value) in &self.value {
            let Some(value) = value else { continue };
            let Ok(flat) = flat_str.parse::<usize>() else {
                continue;
            };
            if flat >= cell_count {
                continue;
            }
            let positions = unflatten(flat, &self.size);
            let mut coords = HashMap::with_capacity(self.id.len());
            let mut complete = true;
            for (dim, pos) in self.id.iter().zip(positions) {
                match code_by_pos.get(dim.as_str()).and_then(|m| m.get(&pos)) {
                    Some(code) => {
                        coords.insert(dim.clone(), (*code).to_string());
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                out.push(Observation {
                    coords,
                    value: *value,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflatten_matches_hand_computed_coords() {
        // sizes [2, 3, 2]: flat = ((a * 3) + b) * 2 + c
        assert_eq!(unflatten(0, &[2, 3, 2]), vec![0, 0, 0]);
        assert_eq!(unflatten(1, &[2, 3, 2]), vec![0, 0, 1]);
        assert_eq!(unflatten(2, &[2, 3, 2]), vec![0, 1, 0]);
        assert_eq!(unflatten(7, &[2, 3, 2]), vec![1, 0, 1]);
        assert_eq!(unflatten(11, &[2, 3, 2]), vec![1, 2, 1]);
    }

    #[test]
    fn observations_decode_a_small_hypercube() {
        // 2 indicators x 2 years; flat index = indic * 2 + year
        let raw = serde_json::json!({
            "id": ["indic_et", "time"],
            "size": [2, 2],
            "dimension": {
                "indic_et": {"category": {"index": {"MIO_EXP_VAL": 0, "MIO_IMP_VAL": 1}}},
                "time": {"category": {"index": {"2023": 0, "2024": 1}}}
            },
            "value": {"0": 10.0, "1": 20.0, "3": 40.0, "2": null}
        });
        let stat: JsonStat = serde_json::from_value(raw).unwrap();
        let mut obs = stat.observations();
        obs.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());

        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].coords["indic_et"], "MIO_EXP_VAL");
        assert_eq!(obs[0].coords["time"], "2023");
        assert_eq!(obs[0].value, 10.0);
        assert_eq!(obs[2].coords["indic_et"], "MIO_IMP_VAL");
        assert_eq!(obs[2].coords["time"], "2024");
        assert_eq!(obs[2].value, 40.0);
    }

    #[test]
    fn out_of_range_cells_are_dropped() {
        let raw = serde_json::json!({
            "id": ["time"],
            "size": [1],
            "dimension": {"time": {"category": {"index": {"2024": 0}}}},
            "value": {"0": 5.0, "9": 9.0, "x": 1.0}
        });
        let stat: JsonStat = serde_json::from_value(raw).unwrap();
        let obs = stat.observations();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].value, 5.0);
    }
}
