//! Channel classification against static membership tables
//!
//! Tables are checked in a fixed order (national free-to-air, premium, cable,
//! regional) and the first match wins. Matching is exact on the trimmed name.

use crate::models::{Category, Classification};

const TDT_CHANNELS: &[&str] = &[
    "La 1",
    "La 2",
    "Antena 3",
    "Cuatro",
    "Telecinco",
    "laSexta",
    "La Sexta",
    "24h",
    "Clan",
    "Teledeporte",
    "Neox",
    "Nova",
    "Mega",
    "Atreseries",
    "FDF",
    "Energy",
    "Divinity",
    "Boing",
    "BeMad",
    "Trece",
    "DMAX",
    "Paramount Network",
    "Ten",
    "DKISS",
    "Real Madrid TV",
    "GOL PLAY",
];

const MOVISTAR_CHANNELS: &[&str] = &[
    "Movistar Plus+",
    "#0",
    "#Vamos",
    "Movistar Plus+ 2",
    "Movistar Estrenos",
    "Movistar Acción",
    "Movistar Comedia",
    "Movistar Drama",
    "Movistar Clásicos",
    "Movistar Cine Español",
    "Movistar Documentales",
    "Movistar Series",
    "Movistar Series 2",
    "Movistar LaLiga",
    "Movistar Liga de Campeones",
    "Movistar Deportes",
    "Movistar Golf",
    "Movistar Vamos",
    "Movistar Ellas V",
];

const CABLE_CHANNELS: &[&str] = &[
    "AXN",
    "AXN Movies",
    "Calle 13",
    "SyFy",
    "TNT",
    "Warner TV",
    "AMC",
    "AMC Break",
    "AMC Crime",
    "Cosmopolitan",
    "Comedy Central",
    "Canal Hollywood",
    "Sundance TV",
    "Dark",
    "Historia",
    "Odisea",
    "National Geographic",
    "Nat Geo Wild",
    "Discovery Channel",
    "Eurosport 1",
    "Eurosport 2",
    "Disney Junior",
    "Nickelodeon",
    "Nick Jr.",
    "Cartoon Network",
    "Baby TV",
    "MTV",
    "Sol Música",
    "Canal Cocina",
    "Decasa",
    "XTRM",
    "Somos",
    "Iberalia TV",
    "Caza y Pesca",
    "Cazavisión",
];

/// Regional broadcasters and the region each serves
const AUTONOMIC_CHANNELS: &[(&str, &str)] = &[
    ("TV3", "Cataluña"),
    ("3Cat", "Cataluña"),
    ("33", "Cataluña"),
    ("Super3", "Cataluña"),
    ("Esport3", "Cataluña"),
    ("8TV", "Cataluña"),
    ("ETB 1", "País Vasco"),
    ("ETB 2", "País Vasco"),
    ("ETB 3", "País Vasco"),
    ("ETB 4", "País Vasco"),
    ("Telemadrid", "Madrid"),
    ("La Otra", "Madrid"),
    ("À Punt", "Comunidad Valenciana"),
    ("Canal Sur", "Andalucía"),
    ("Canal Sur 2", "Andalucía"),
    ("Andalucía TV", "Andalucía"),
    ("TVG", "Galicia"),
    ("TVG 2", "Galicia"),
    ("CMM TV", "Castilla-La Mancha"),
    ("La 7", "Castilla y León"),
    ("La 8", "Castilla y León"),
    ("Aragón TV", "Aragón"),
    ("Canarias TV", "Canarias"),
    ("TPA", "Asturias"),
    ("TPA 7", "Asturias"),
    ("IB3", "Islas Baleares"),
    ("Canal Extremadura", "Extremadura"),
    ("7 Región de Murcia", "Murcia"),
    ("Navarra TV", "Navarra"),
    ("La Rioja TV", "La Rioja"),
    ("Popular TV Cantabria", "Cantabria"),
];

/// Classify a channel by name
pub fn classify(name: &str) -> Classification {
    let name = name.trim();

    let tiers = [
        (Category::Tdt, TDT_CHANNELS),
        (Category::Movistar, MOVISTAR_CHANNELS),
        (Category::Cable, CABLE_CHANNELS),
    ];
    for (category, table) in tiers {
        if table.contains(&name) {
            return Classification {
                category,
                region: None,
            };
        }
    }

    AUTONOMIC_CHANNELS
        .iter()
        .find(|(channel, _)| *channel == name)
        .map(|(_, region)| Classification {
            category: Category::Autonomic,
            region: Some((*region).to_string()),
        })
        .unwrap_or_else(Classification::unknown)
}
