// src/constants.rs
// Domain tables shared by the ingestion agents and the derive phase.

/// Morocco country identifiers in the classifications the upstreams use.
pub const MOROCCO_ISO2: &str = "MA";
pub const MOROCCO_M49: &str = "504";
pub const MOROCCO_NAME_FR: &str = "Maroc";

/// Textile HS chapters (50-63), two-digit prefixes.
pub const TEXTILE_HS_CHAPTERS: [&str; 14] = [
    "50", "51", "52", "53", "54", "55", "56", "57", "58", "59", "60", "61", "62", "63",
];

/// French chapter labels, used for `hs_description` and segment seeding.
pub fn hs_chapter_label_fr(chapter: &str) -> Option<&'static str> {
    let label = match chapter {
        "50" => "Soie",
        "51" => "Laine, poils fins ou grossiers",
        "52" => "Coton",
        "53" => "Autres fibres textiles vegetales",
        "54" => "Filaments synthetiques ou artificiels",
        "55" => "Fibres synthetiques ou artificielles discontinues",
        "56" => "Ouates, feutres et non-tisses",
        "57" => "Tapis et autres revetements de sol",
        "58" => "Tissus speciaux",
        "59" => "Tissus impregnes, enduits ou recouverts",
        "60" => "Etoffes de bonneterie",
        "61" => "Vetements et accessoires en bonneterie",
        "62" => "Vetements et accessoires autres qu'en bonneterie",
        "63" => "Autres articles textiles confectionnes",
        _ => return None,
    };
    Some(label)
}

/// Top global trading partners for partner-level Comtrade queries (M49 codes).
/// "0" is the world aggregate.
pub const GLOBAL_TOP_PARTNERS_M49: [(&str, &str); 10] = [
    ("250", "France"),
    ("724", "Espagne"),
    ("276", "Allemagne"),
    ("380", "Italie"),
    ("620", "Portugal"),
    ("840", "Etats-Unis"),
    ("156", "Chine"),
    ("792", "Turquie"),
    ("699", "Inde"),
    ("0", "Monde"),
];

/// Aggregate market segments seeded by the derive phase: (axis, code, label_fr, label_en).
pub const AGGREGATE_SEGMENTS: [(&str, &str, &str, &str); 8] = [
    ("product_category", "apparel", "Vetements et habillement", "Apparel & Clothing"),
    ("product_category", "home_textiles", "Textiles de maison", "Home Textiles"),
    ("product_category", "technical_textiles", "Textiles techniques", "Technical Textiles"),
    ("product_category", "raw_materials", "Matieres premieres textiles", "Raw Textile Materials"),
    ("fiber_type", "cotton", "Coton", "Cotton"),
    ("fiber_type", "synthetic", "Fibres synthetiques", "Synthetic Fibers"),
    ("fiber_type", "wool", "Laine", "Wool"),
    ("fiber_type", "silk", "Soie", "Silk"),
];

pub fn textile_hs_chapters_param() -> String {
    TEXTILE_HS_CHAPTERS.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chapter_has_a_label() {
        for ch in TEXTILE_HS_CHAPTERS {
            assert!(hs_chapter_label_fr(ch).is_some(), "missing label for {ch}");
        }
        assert!(hs_chapter_label_fr("99").is_none());
    }
}
