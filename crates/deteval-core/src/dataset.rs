//! Static registry of evaluation dataset bundles.
//!
//! Maps the `--dataset` spelling an operator uses to the concrete dataset
//! identifiers the inference engine iterates and the class count the
//! model head was trained with. A lookup table keeps the set open for
//! extension without touching dispatch logic.

/// One resolvable dataset bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetEval {
    /// Spelling accepted by `--dataset`.
    pub name: &'static str,

    /// Concrete dataset identifiers handed to the inference engine.
    pub datasets: &'static [&'static str],

    /// Number of object classes, background included.
    pub num_classes: u32,
}

/// Known dataset bundles, keyed by the `--dataset` spelling.
const REGISTRY: &[DatasetEval] = &[
    DatasetEval {
        name: "coco2017",
        datasets: &["coco_2017_val"],
        num_classes: 81,
    },
    DatasetEval {
        name: "keypoints_coco2017",
        datasets: &["keypoints_coco_2017_val"],
        num_classes: 2,
    },
    // CS6 surveillance splits
    DatasetEval {
        name: "cs6_annot_eval_val-easy",
        datasets: &["cs6_annot_eval_val-easy"],
        num_classes: 2,
    },
    DatasetEval {
        name: "cs6_test_gt",
        datasets: &["cs6_TEST_gt"],
        num_classes: 2,
    },
    // Cityscapes
    DatasetEval {
        name: "cityscapes_val",
        datasets: &["cityscapes_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "cityscapes_car_val",
        datasets: &["cityscapes_car_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "cityscapes_peds_val",
        datasets: &["cityscapes_peds_val"],
        num_classes: 2,
    },
    // BDD constraint splits
    DatasetEval {
        name: "bdd_any_any_daytime",
        datasets: &["bdd_any_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_clear_any_daytime",
        datasets: &["bdd_clear_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_any_any_any",
        datasets: &["bdd_any_any_any_val"],
        num_classes: 2,
    },
    // BDD pedestrians
    DatasetEval {
        name: "bdd_peds_val",
        datasets: &["bdd_peds_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_full_val",
        datasets: &["bdd_peds_full_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_not_clear_any_daytime_val",
        datasets: &["bdd_peds_not_clear_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_dets18k_target_domain",
        datasets: &["bdd_peds_dets18k_target_domain"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_TEST",
        datasets: &["bdd_peds_TEST"],
        num_classes: 2,
    },
    // BDD pedestrian sub-domains (weather x time-of-day)
    DatasetEval {
        name: "bdd_peds_any_any_night_val",
        datasets: &["bdd_peds_any_any_night_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_rainy_any_daytime_val",
        datasets: &["bdd_peds_rainy_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_rainy_any_night_val",
        datasets: &["bdd_peds_rainy_any_night_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_overcast_any_daytime_val",
        datasets: &["bdd_peds_overcast_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_overcast_any_night_val",
        datasets: &["bdd_peds_overcast_any_night_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_snowy_any_daytime_val",
        datasets: &["bdd_peds_snowy_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_snowy_any_night_val",
        datasets: &["bdd_peds_snowy_any_night_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_overcast,rainy_any_daytime_val",
        datasets: &["bdd_peds_overcast,rainy_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_overcast,rainy_any_night_val",
        datasets: &["bdd_peds_overcast,rainy_any_night_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_overcast,rainy,snowy_any_daytime_val",
        datasets: &["bdd_peds_overcast,rainy,snowy_any_daytime_val"],
        num_classes: 2,
    },
    DatasetEval {
        name: "bdd_peds_overcast,rainy,snowy_any_night_val",
        datasets: &["bdd_peds_overcast,rainy,snowy_any_night_val"],
        num_classes: 2,
    },
    // WIDER faces
    DatasetEval {
        name: "wider_val",
        datasets: &["wider_val"],
        num_classes: 2,
    },
];

/// Look up a dataset bundle by its `--dataset` spelling.
pub fn lookup(name: &str) -> Option<&'static DatasetEval> {
    REGISTRY.iter().find(|entry| entry.name == name)
}

/// Names accepted by `--dataset`, in registry order.
pub fn known_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|entry| entry.name)
}
