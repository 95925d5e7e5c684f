//! Game and engine version database
//!
//! Every package carries a file version and a licensee version in its header.
//! Licensed titles stamp their own values there, which is how a package is
//! attributed to a game and therefore to a binary dialect.
//!
//! # Game identifiers
//!
//! A [`Game`] is a 32-bit id whose engine bits (`id & 0xFF00`) group titles:
//!
//! | Engine     | Bits     |
//! |------------|----------|
//! | UE1        | `0x1000` |
//! | UE2        | `0x2000` |
//! | Vengeance  | `0x2100` |
//! | Lead       | `0x2200` |
//! | UE2X       | `0x4000` |
//! | UE3        | `0x8000` |
//! | Midway3    | `0x8100` |
//!
//! Generation 4 ids are `0x0100_0000 + (minor << 4)`, so `Game::ue4(26)`
//! is engine 4.26 and orders after every older generation.

use std::sync::RwLock;

use serde::Serialize;

use crate::archive::ArchiveVersion;
use crate::{Error, Result};

/// First file version written by the second engine generation.
pub const PACKAGE_V2: i32 = 100;
/// First file version written by the third engine generation.
pub const PACKAGE_V3: i32 = 180;

/// Engine generation, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Engine {
    Unknown,
    UE1,
    UE2,
    Vengeance,
    Lead,
    UE2X,
    UE3,
    Midway3,
    UE4,
}

impl Engine {
    pub fn name(self) -> &'static str {
        match self {
            Engine::UE1 => "Unreal engine 1",
            Engine::UE2 | Engine::Vengeance | Engine::Lead => "Unreal engine 2",
            Engine::UE2X => "Unreal engine 2X",
            Engine::UE3 | Engine::Midway3 => "Unreal engine 3",
            Engine::UE4 => "Unreal engine 4",
            Engine::Unknown => "Unknown UE",
        }
    }
}

/// Game identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Game(pub u32);

/// Engine mask applied to pre-UE4 ids.
pub const GAME_ENGINE: u32 = 0xFF00;

impl Game {
    pub const UNKNOWN: Game = Game(0);

    pub const UE1: Game = Game(0x1000);
    pub const UNDYING: Game = Game(0x1001);

    pub const UE2: Game = Game(0x2000);
    pub const UT2: Game = Game(0x2001);
    pub const PARIAH: Game = Game(0x2002);
    pub const SPLINTER_CELL: Game = Game(0x2003);
    pub const LINEAGE2: Game = Game(0x2004);
    pub const EXTEEL: Game = Game(0x2005);
    pub const RAGNAROK2: Game = Game(0x2006);
    pub const REP_COMMANDO: Game = Game(0x2007);
    pub const LOCO: Game = Game(0x2008);
    pub const BATTLE_TERR: Game = Game(0x2009);
    pub const UC1: Game = Game(0x200A);
    pub const XIII: Game = Game(0x200B);
    pub const AA2: Game = Game(0x200C);
    pub const VANGUARD: Game = Game(0x200D);

    pub const VENGEANCE: Game = Game(0x2100);
    pub const TRIBES3: Game = Game(0x2101);
    pub const SWAT4: Game = Game(0x2102);
    pub const BIOSHOCK: Game = Game(0x2103);

    pub const LEAD: Game = Game(0x2200);
    pub const SPLINTER_CELL_CONV: Game = Game(0x2201);

    pub const UE2X: Game = Game(0x4000);
    pub const UC2: Game = Game(0x4001);

    pub const UE3: Game = Game(0x8000);
    pub const END_WAR: Game = Game(0x8001);
    pub const MASS_EFFECT: Game = Game(0x8002);
    pub const MASS_EFFECT2: Game = Game(0x8003);
    pub const MASS_EFFECT3: Game = Game(0x8004);
    pub const R6_VEGAS2: Game = Game(0x8005);
    pub const MIRROR_EDGE: Game = Game(0x8006);
    pub const TLR: Game = Game(0x8007);
    pub const HUXLEY: Game = Game(0x8008);
    pub const TUROK: Game = Game(0x8009);
    pub const FURY: Game = Game(0x800A);
    pub const XMEN: Game = Game(0x800B);
    pub const MAGNA_CARTA: Game = Game(0x800C);
    pub const ARMY_OF_2: Game = Game(0x800D);
    pub const CRIME_CRAFT: Game = Game(0x800E);
    pub const FIFTY_CENT: Game = Game(0x800F);
    pub const AVA: Game = Game(0x8010);
    pub const FRONTLINES: Game = Game(0x8011);
    pub const BATMAN: Game = Game(0x8012);
    pub const BATMAN2: Game = Game(0x8013);
    pub const BATMAN3: Game = Game(0x8014);
    pub const BORDERLANDS: Game = Game(0x8015);
    pub const AA3: Game = Game(0x8016);
    pub const DARK_VOID: Game = Game(0x8017);
    pub const LEGENDARY: Game = Game(0x8018);
    pub const TERA: Game = Game(0x8019);
    pub const BLADE_N_SOUL: Game = Game(0x801A);
    pub const APB: Game = Game(0x801B);
    pub const ALPHA_PROTOCOL: Game = Game(0x801C);
    pub const TRANSFORMERS: Game = Game(0x801D);
    pub const MORTAL_ONLINE: Game = Game(0x801E);
    pub const ENSLAVED: Game = Game(0x801F);
    pub const MOHA: Game = Game(0x8020);
    pub const MOH2010: Game = Game(0x8021);
    pub const BERKANIX: Game = Game(0x8022);
    pub const DOH: Game = Game(0x8023);
    pub const DC_UNIVERSE: Game = Game(0x8024);
    pub const BULLETSTORM: Game = Game(0x8025);
    pub const UNDERTOW: Game = Game(0x8026);
    pub const SINGULARITY: Game = Game(0x8027);
    pub const TRON: Game = Game(0x8028);
    pub const HUNTED: Game = Game(0x8029);
    pub const DND: Game = Game(0x802A);
    pub const SHADOWS_DAMNED: Game = Game(0x802B);
    pub const ARGONAUTS: Game = Game(0x802C);
    pub const GUN_LEGEND: Game = Game(0x802D);
    pub const SPECIAL_FORCE2: Game = Game(0x802E);
    pub const TRIBES4: Game = Game(0x802F);
    pub const DISHONORED: Game = Game(0x8030);
    pub const FABLE: Game = Game(0x8031);
    pub const DMC: Game = Game(0x8032);
    pub const PLA: Game = Game(0x8033);
    pub const TAO_YUAN: Game = Game(0x8034);
    pub const BIOSHOCK3: Game = Game(0x8035);
    pub const REMEMBER_ME: Game = Game(0x8036);
    pub const MARVEL_HEROES: Game = Game(0x8037);
    pub const LOST_PLANET3: Game = Game(0x8038);
    pub const XCOM_B: Game = Game(0x8039);
    pub const THIEF4: Game = Game(0x803A);
    pub const MURDERED: Game = Game(0x803B);
    pub const SOV: Game = Game(0x803C);
    pub const VEC: Game = Game(0x803D);
    pub const DUST514: Game = Game(0x803E);
    pub const ALIENS_CM: Game = Game(0x803F);
    pub const GOWJ: Game = Game(0x8040);

    pub const MIDWAY3: Game = Game(0x8100);
    pub const A51: Game = Game(0x8101);
    pub const WHEELMAN: Game = Game(0x8102);
    pub const MK: Game = Game(0x8103);
    pub const STRANGLE: Game = Game(0x8104);
    pub const TNA: Game = Game(0x8105);

    pub const UE4_BASE: Game = Game(0x0100_0000);

    /// Generation 4 sub-version `4.minor`.
    pub const fn ue4(minor: u32) -> Game {
        Game(Self::UE4_BASE.0 + (minor << 4))
    }

    pub fn engine(self) -> Engine {
        if self.0 >= Self::UE4_BASE.0 {
            return Engine::UE4;
        }
        match self.0 & GAME_ENGINE {
            0x1000 => Engine::UE1,
            0x2000 => Engine::UE2,
            0x2100 => Engine::Vengeance,
            0x2200 => Engine::Lead,
            0x4000 => Engine::UE2X,
            0x8000 => Engine::UE3,
            0x8100 => Engine::Midway3,
            _ => Engine::Unknown,
        }
    }

    /// The `4.N` sub-version for generation 4 ids.
    pub fn ue4_minor(self) -> Option<u32> {
        (self.0 >= Self::UE4_BASE.0).then(|| (self.0 - Self::UE4_BASE.0) >> 4)
    }
}

/// A row of the game table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameSignature {
    pub id: Game,
    pub name: &'static str,
    /// Command line tag, absent for titles only reachable through detection.
    pub tag: Option<&'static str>,
}

impl GameSignature {
    pub const fn new(name: &'static str, tag: &'static str, id: Game) -> Self {
        Self {
            id,
            name,
            tag: Some(tag),
        }
    }

    pub const fn untagged(name: &'static str, id: Game) -> Self {
        Self {
            id,
            name,
            tag: None,
        }
    }

    pub fn engine(&self) -> Engine {
        self.id.engine()
    }
}

fn builtin_games() -> Vec<GameSignature> {
    let g = GameSignature::new;
    let u = GameSignature::untagged;
    vec![
        g("Unreal engine 1", "ue1", Game::UE1),
        u("Unreal 1", Game::UE1),
        u("Unreal Tournament 1 (UT99)", Game::UE1),
        u("The Wheel of Time", Game::UE1),
        u("DeusEx", Game::UE1),
        u("Rune", Game::UE1),
        g("Undying", "undying", Game::UNDYING),
        g("Unreal engine 2", "ue2", Game::UE2),
        g("Unreal Tournament 2003,2004", "ut2", Game::UT2),
        g("Unreal Championship", "uc1", Game::UC1),
        g("Splinter Cell 1,2", "scell", Game::SPLINTER_CELL),
        g("Splinter Cell: Conviction", "scconv", Game::SPLINTER_CELL_CONV),
        g("Lineage 2", "l2", Game::LINEAGE2),
        g("Land of Chaos Online (LOCO)", "loco", Game::LOCO),
        g("Battle Territory Online", "bterr", Game::BATTLE_TERR),
        g("Star Wars: Republic Commando", "swrc", Game::REP_COMMANDO),
        g("XIII", "xiii", Game::XIII),
        u("UE2Runtime", Game::UE2),
        g("Tribes: Vengeance", "t3", Game::TRIBES3),
        g("SWAT 4", "swat4", Game::SWAT4),
        g("Bioshock, Bioshock 2", "bio", Game::BIOSHOCK),
        g("Ragnarok Online 2", "rag2", Game::RAGNAROK2),
        g("Exteel", "extl", Game::EXTEEL),
        g("America's Army 2", "aa2", Game::AA2),
        g("Vanguard: Saga of Heroes", "vang", Game::VANGUARD),
        u("Killing Floor", Game::UE2),
        g("Unreal Championship 2: The Liandri Conflict", "uc2", Game::UC2),
        g("Unreal engine 3", "ue3", Game::UE3),
        u("Unreal Tournament 3", Game::UE3),
        u("Gears of War", Game::UE3),
        u("Gears of War 2", Game::UE3),
        u("Gears of War 3", Game::UE3),
        g("Gears of War: Judgment", "gowj", Game::GOWJ),
        u("Infinity Blade", Game::UE3),
        g("Bulletstorm", "bs", Game::BULLETSTORM),
        g("EndWar", "endwar", Game::END_WAR),
        g("Rainbow 6: Vegas 2", "r6v2", Game::R6_VEGAS2),
        g("Mass Effect", "mass", Game::MASS_EFFECT),
        g("Mass Effect 2", "mass2", Game::MASS_EFFECT2),
        g("Mass Effect 3", "mass3", Game::MASS_EFFECT3),
        g("BlackSite: Area 51", "a51", Game::A51),
        g("Mortal Kombat vs. DC Universe", "mk", Game::MK),
        g("Mortal Kombat", "mk", Game::MK),
        g("Injustice: Gods Among Us", "mk", Game::MK),
        g("Turok", "turok", Game::TUROK),
        g("Fury", "fury", Game::FURY),
        g("TNA iMPACT!", "tna", Game::TNA),
        g("Stranglehold", "strang", Game::STRANGLE),
        g("Army of Two", "ao2", Game::ARMY_OF_2),
        g("Destroy All Humans", "doh", Game::DOH),
        g("Huxley", "huxley", Game::HUXLEY),
        g("The Last Remnant", "tlr", Game::TLR),
        g("Mirror's Edge", "medge", Game::MIRROR_EDGE),
        g("X-Men Origins: Wolverine", "xmen", Game::XMEN),
        g("Magna Carta 2", "mcarta", Game::MAGNA_CARTA),
        g("Batman: Arkham Asylum", "batman", Game::BATMAN),
        g("Batman: Arkham City", "batman2", Game::BATMAN2),
        g("Batman: Arkham Origins", "batman3", Game::BATMAN3),
        g("Crime Craft", "crime", Game::CRIME_CRAFT),
        g("AVA Online", "ava", Game::AVA),
        g("Frontlines: Fuel of War", "frontl", Game::FRONTLINES),
        g("Homefront", "frontl", Game::FRONTLINES),
        g("50 Cent: Blood on the Sand", "50cent", Game::FIFTY_CENT),
        g("Borderlands", "border", Game::BORDERLANDS),
        g("Borderlands 2", "border", Game::BORDERLANDS),
        g("Brothers in Arms: Hell's Highway", "border", Game::BORDERLANDS),
        g("Aliens: Colonial Marines", "acm", Game::ALIENS_CM),
        g("Dark Void", "darkv", Game::DARK_VOID),
        g("Legendary: Pandora's Box", "leg", Game::LEGENDARY),
        g("TERA: The Exiled Realm of Arborea", "tera", Game::TERA),
        g("Blade & Soul", "bns", Game::BLADE_N_SOUL),
        g("Alpha Protocol", "alpha", Game::ALPHA_PROTOCOL),
        g("All Points Bulletin", "apb", Game::APB),
        g("The Bourne Conspiracy", "trans", Game::TRANSFORMERS),
        g("Transformers: War for Cybertron", "trans", Game::TRANSFORMERS),
        g("Transformers: Dark of the Moon", "trans", Game::TRANSFORMERS),
        g("Transformers: Fall of Cybertron", "trans", Game::TRANSFORMERS),
        g("America's Army 3", "aa3", Game::AA3),
        g("Mortal Online", "mo", Game::MORTAL_ONLINE),
        g("Enslaved: Odyssey to the West", "ens", Game::ENSLAVED),
        g("Medal of Honor: Airborne", "moha", Game::MOHA),
        g("Medal of Honor 2010", "moh2010", Game::MOH2010),
        g("Berkanix", "berk", Game::BERKANIX),
        g("Undertow", "undertow", Game::UNDERTOW),
        g("Singularity", "sing", Game::SINGULARITY),
        u("Nurien", Game::UE3),
        g("Hunted: The Demon's Forge", "hunt", Game::HUNTED),
        g("Dungeons & Dragons: Daggerdale", "dnd", Game::DND),
        g("Shadows of the Damned", "shad", Game::SHADOWS_DAMNED),
        g("Rise of the Argonauts", "argo", Game::ARGONAUTS),
        g("Thor: God of Thunder", "argo", Game::ARGONAUTS),
        g("Gunslayer Legend", "gunsl", Game::GUN_LEGEND),
        g("Special Force 2", "sf2", Game::SPECIAL_FORCE2),
        g("Tribes: Ascend", "t4", Game::TRIBES4),
        g("Dishonored", "dis", Game::DISHONORED),
        g("Fable: The Journey", "fable", Game::FABLE),
        g("Fable Anniversary", "fable", Game::FABLE),
        g("DmC: Devil May Cry", "dmc", Game::DMC),
        u("Hawken", Game::UE3),
        g("Passion Leads Army", "pla", Game::PLA),
        g("Tao Yuan", "taoyuan", Game::TAO_YUAN),
        g("Bioshock Infinite", "bio3", Game::BIOSHOCK3),
        g("Remember Me", "rem", Game::REMEMBER_ME),
        g("Marvel Heroes", "mh", Game::MARVEL_HEROES),
        g("Lost Planet 3", "lp3", Game::LOST_PLANET3),
        g("Yaiba: Ninja Gaiden Z", "lp3", Game::LOST_PLANET3),
        g("The Bureau: XCOM Declassified", "xcom", Game::XCOM_B),
        g("Thief", "thief4", Game::THIEF4),
        g("Murdered: Soul Suspect", "murd", Game::MURDERED),
        g("Seal of Vajra", "sov", Game::SOV),
        g("The Vanishing of Ethan Carter", "vec", Game::VEC),
        g("Dust 514", "dust514", Game::DUST514),
        g("Unreal engine 4", "ue4", Game::UE4_BASE),
    ]
}

/// One detection rule: file version range and licensee range inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub ver_min: i32,
    pub ver_max: i32,
    pub lic_min: i32,
    pub lic_max: i32,
    pub game: Game,
}

impl Rule {
    pub const fn new(ver_min: i32, ver_max: i32, lic_min: i32, lic_max: i32, game: Game) -> Self {
        Self {
            ver_min,
            ver_max,
            lic_min,
            lic_max,
            game,
        }
    }

    /// Single file version, single licensee version.
    pub const fn exact(ver: i32, lic: i32, game: Game) -> Self {
        Self::new(ver, ver, lic, lic, game)
    }

    pub fn matches(&self, ver: i32, lic: i32) -> bool {
        (self.ver_min..=self.ver_max).contains(&ver) && (self.lic_min..=self.lic_max).contains(&lic)
    }
}

fn builtin_rules() -> Vec<Rule> {
    let r = Rule::new;
    let x = Rule::exact;
    vec![
        // Generation 2
        r(117, 119, 25, 27, Game::UT2),
        r(120, 120, 27, 28, Game::UT2),
        r(121, 128, 29, 29, Game::UT2),
        x(119, 0x9127, Game::PARIAH),
        x(119, 28, Game::UC1),
        x(119, 30, Game::UC1),
        r(151, 151, 0, 1, Game::UC2),
        r(131, 134, 29, 29, Game::LOCO),
        r(100, 100, 9, 17, Game::SPLINTER_CELL),
        r(133, 148, 1, 1, Game::REP_COMMANDO),
        r(154, 159, 1, 1, Game::REP_COMMANDO),
        r(129, 130, 0x17, 0x1B, Game::TRIBES3),
        r(123, 123, 3, 0xF, Game::TRIBES3),
        r(126, 126, 0x12, 0x17, Game::TRIBES3),
        r(141, 141, 56, 57, Game::BIOSHOCK),
        x(143, 59, Game::BIOSHOCK),
        // Generation 3, one version per title
        x(241, 71, Game::R6_VEGAS2),
        x(375, 25, Game::STRANGLE),
        x(377, 25, Game::A51),
        x(380, 35, Game::TNA),
        x(390, 32, Game::WHEELMAN),
        x(407, 26, Game::FURY),
        x(407, 36, Game::FURY),
        x(421, 11, Game::MOHA),
        x(446, 25, Game::MAGNA_CARTA),
        r(451, 451, 52, 53, Game::AVA),
        x(455, 90, Game::DOH),
        x(507, 11, Game::TLR),
        x(536, 43, Game::MIRROR_EDGE),
        x(538, 73, Game::FIFTY_CENT),
        x(539, 43, Game::ARGONAUTS),
        x(539, 47, Game::ARGONAUTS),
        x(539, 91, Game::ALPHA_PROTOCOL),
        r(547, 547, 31, 32, Game::APB),
        x(567, 39, Game::LEGENDARY),
        x(568, 101, Game::XMEN),
        x(576, 5, Game::CRIME_CRAFT),
        x(576, 21, Game::BATMAN),
        x(576, 61, Game::DARK_VOID),
        x(576, 66, Game::DARK_VOID),
        x(581, 58, Game::MOH2010),
        x(584, 126, Game::SINGULARITY),
        x(648, 3, Game::TRON),
        x(648, 6405, Game::DC_UNIVERSE),
        x(673, 2, Game::ENSLAVED),
        x(678, 32771, Game::MORTAL_ONLINE),
        x(706, 28, Game::SHADOWS_DAMNED),
        x(708, 35, Game::DUST514),
        x(721, 148, Game::THIEF4),
        x(727, 75, Game::BIOSHOCK3),
        x(742, 29, Game::BULLETSTORM),
        x(787, 47, Game::ALIENS_CM),
        x(801, 30, Game::DISHONORED),
        x(805, 2, Game::TRIBES4),
        x(805, 101, Game::BATMAN2),
        r(806, 807, 103, 103, Game::BATMAN3),
        r(806, 807, 137, 138, Game::BATMAN3),
        x(832, 21, Game::REMEMBER_ME),
        x(845, 4, Game::DMC),
        x(849, 32795, Game::XCOM_B),
        x(850, 1017, Game::FABLE),
        x(850, 26985, Game::FABLE),
        x(860, 1017, Game::FABLE),
        x(860, 26985, Game::FABLE),
        x(860, 93, Game::MURDERED),
        r(860, 860, 97, 98, Game::LOST_PLANET3),
        x(904, 9, Game::SPECIAL_FORCE2),
        x(904, 14, Game::SPECIAL_FORCE2),
        // Generation 3, several versions per title
        x(374, 16, Game::TUROK),
        x(375, 19, Game::TUROK),
        x(392, 23, Game::TUROK),
        r(393, 393, 27, 61, Game::TUROK),
        x(391, 92, Game::MASS_EFFECT),
        x(491, 1008, Game::MASS_EFFECT),
        x(512, 130, Game::MASS_EFFECT2),
        x(684, 185, Game::MASS_EFFECT3),
        x(684, 194, Game::MASS_EFFECT3),
        x(402, 30, Game::MK),
        x(472, 46, Game::MK),
        x(573, 49, Game::MK),
        x(402, 0, Game::HUXLEY),
        x(402, 10, Game::HUXLEY),
        r(491, 491, 13, 16, Game::HUXLEY),
        r(496, 496, 16, 23, Game::HUXLEY),
        x(433, 52, Game::FRONTLINES),
        x(576, 100, Game::FRONTLINES),
        x(445, 79, Game::ARMY_OF_2),
        x(482, 222, Game::ARMY_OF_2),
        x(483, 4317, Game::ARMY_OF_2),
        x(511, 39, Game::TRANSFORMERS),
        r(511, 511, 144, 145, Game::TRANSFORMERS),
        x(537, 174, Game::TRANSFORMERS),
        x(846, 181, Game::TRANSFORMERS),
        x(512, 35, Game::BORDERLANDS),
        r(584, 584, 57, 58, Game::BORDERLANDS),
        x(832, 46, Game::BORDERLANDS),
        r(568, 568, 9, 10, Game::TERA),
        r(610, 610, 13, 14, Game::TERA),
    ]
}

/// Generation 4 file version at which each `4.N` release starts.
pub const UE4_ENGINE_VERSIONS: [i32; 28] = [
    342, 352, 363, 382, 385, 401, 413, 434, 451, 482, 482, 498, 504, 505, 508, 510, 513, 513, 514,
    516, 516, 517, 517, 517, 518, 518, 522, 522,
];

/// Newest `4.N` release with a known file version.
pub const LATEST_SUPPORTED_UE4_VERSION: u32 = UE4_ENGINE_VERSIONS.len() as u32 - 1;

/// Oldest engine release matching each legacy header selector (`-1` first).
const LEGACY_TO_ENGINE: [i32; 7] = [-1, -1, 0, 7, 7, 11, 14];

/// Last `4.N` whose starting file version is `<= file_version`.
pub fn ue4_minor_for_version(file_version: i32) -> u32 {
    UE4_ENGINE_VERSIONS
        .iter()
        .rposition(|&v| v <= file_version)
        .unwrap_or(0) as u32
}

/// Oldest engine release a legacy selector (`-2` to `-7`) may describe.
pub fn ue4_minor_for_legacy(legacy_version: i32) -> Result<u32> {
    let oldest = -(LEGACY_TO_ENGINE.len() as i32);
    if legacy_version >= -1 || legacy_version < oldest {
        return Err(Error::unsupported("UE4 legacy version", legacy_version));
    }
    let index = (-legacy_version - 1) as usize;
    Ok(LEGACY_TO_ENGINE[index].max(0) as u32)
}

/// Generation 4 file version constants used by the loaders.
pub mod ue4_ver {
    pub const ASSET_REGISTRY_TAGS: i32 = 112;
    pub const REMOVE_ARCHETYPE_INDEX_FROM_LINKER_TABLES: i32 = 163;
    pub const REMOVE_NET_INDEX: i32 = 196;
    pub const BULKDATA_AT_LARGE_OFFSETS: i32 = 198;
    pub const SUMMARY_HAS_BULKDATA_OFFSET: i32 = 212;
    pub const WORLD_LEVEL_INFO: i32 = 224;
    pub const CHANGED_CHUNKID_TO_BE_AN_ARRAY_OF_CHUNKIDS: i32 = 278;
    pub const ARRAY_PROPERTY_INNER_TAGS: i32 = 282;
    pub const ADDED_CHUNKID_TO_ASSETDATA_AND_UPACKAGE: i32 = 326;
    pub const ENGINE_VERSION_OBJECT: i32 = 336;
    pub const LOAD_FOR_EDITOR_GAME: i32 = 365;
    pub const ADD_STRING_ASSET_REFERENCES_MAP: i32 = 384;
    pub const STRUCT_GUID_IN_PROPERTY_TAG: i32 = 441;
    pub const PACKAGE_SUMMARY_HAS_COMPATIBLE_ENGINE_VERSION: i32 = 444;
    pub const SERIALIZE_TEXT_IN_PACKAGES: i32 = 459;
    pub const COOKED_ASSETS_IN_EDITOR_SUPPORT: i32 = 485;
    pub const INNER_ARRAY_TAG_INFO: i32 = 500;
    pub const PROPERTY_GUID_IN_PROPERTY_TAG: i32 = 503;
    pub const NAME_HASHES_SERIALIZED: i32 = 504;
    pub const PRELOAD_DEPENDENCIES_IN_COOKED_EXPORTS: i32 = 507;
    pub const TEMPLATE_INDEX_IN_COOKED_EXPORTS: i32 = 508;
    pub const PROPERTY_TAG_SET_MAP_SUPPORT: i32 = 509;
    pub const ADDED_SEARCHABLE_NAMES: i32 = 510;
    pub const SIXTY_FOUR_BIT_EXPORTMAP_SERIALSIZES: i32 = 511;
    pub const ADDED_SOFT_OBJECT_PATH: i32 = 514;
    pub const ADDED_PACKAGE_SUMMARY_LOCALIZATION_ID: i32 = 516;
    pub const ADDED_PACKAGE_OWNER: i32 = 518;
    pub const NON_OUTER_PACKAGE_IMPORT: i32 = 520;
}

static FORCED_GAME: RwLock<Option<Game>> = RwLock::new(None);
static FORCED_VERSION: RwLock<Option<i32>> = RwLock::new(None);

/// Force every subsequently opened package to the given game.
pub fn set_forced_game(game: Option<Game>) {
    *FORCED_GAME.write().unwrap_or_else(|e| e.into_inner()) = game;
}

pub fn forced_game() -> Option<Game> {
    *FORCED_GAME.read().unwrap_or_else(|e| e.into_inner())
}

/// Force the file version of every subsequently opened package.
pub fn set_forced_version(version: Option<i32>) {
    *FORCED_VERSION.write().unwrap_or_else(|e| e.into_inner()) = version;
}

pub fn forced_version() -> Option<i32> {
    *FORCED_VERSION.read().unwrap_or_else(|e| e.into_inner())
}

/// Game table and detection rules.
#[derive(Debug, Clone)]
pub struct GameCatalog {
    games: Vec<GameSignature>,
    rules: Vec<Rule>,
}

impl Default for GameCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl GameCatalog {
    pub fn new() -> Self {
        Self {
            games: builtin_games(),
            rules: builtin_rules(),
        }
    }

    /// Append signatures; later entries win tag collisions.
    pub fn register(&mut self, entries: impl IntoIterator<Item = GameSignature>) {
        self.games.extend(entries);
    }

    /// Append detection rules, evaluated after the built-in ones.
    pub fn register_rules(&mut self, rules: impl IntoIterator<Item = Rule>) {
        self.rules.extend(rules);
    }

    pub fn games(&self) -> &[GameSignature] {
        &self.games
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn lookup_by_tag(&self, tag: &str) -> Result<Game> {
        if let Some(found) = self
            .games
            .iter()
            .rev()
            .find(|g| g.tag.is_some_and(|t| t.eq_ignore_ascii_case(tag)))
        {
            return Ok(found.id);
        }
        let lower = tag.to_ascii_lowercase();
        if let Some(minor) = lower.strip_prefix("ue4.") {
            if let Ok(minor) = minor.parse::<u32>() {
                if minor <= LATEST_SUPPORTED_UE4_VERSION {
                    return Ok(Game::ue4(minor));
                }
            }
        }
        Err(Error::NotFound(format!("game tag '{}'", tag)))
    }

    pub fn tag_for(&self, game: Game) -> Option<String> {
        if let Some(found) = self.games.iter().rev().find(|g| g.id == game) {
            if let Some(tag) = found.tag {
                return Some(tag.to_string());
            }
        }
        game.ue4_minor().map(|minor| format!("ue4.{}", minor))
    }

    pub fn name_for(&self, game: Game) -> &'static str {
        self.games
            .iter()
            .find(|g| g.id == game)
            .map(|g| g.name)
            .unwrap_or_else(|| game.engine().name())
    }

    /// Distinct games whose rules match the given versions.
    pub fn matching_games(&self, file_version: i32, licensee_version: i32) -> Vec<Game> {
        let mut found = Vec::new();
        for rule in &self.rules {
            if rule.matches(file_version, licensee_version) && !found.contains(&rule.game) {
                found.push(rule.game);
            }
        }
        found
    }

    /// Attribute a pre-UE4 header to a game.
    pub fn detect_from_signature(&self, file_version: i32, licensee_version: i32) -> Game {
        let found = self.matching_games(file_version, licensee_version);
        if found.len() > 1 {
            tracing::warn!(
                "detected {} titles for version {}/{}",
                found.len(),
                file_version,
                licensee_version
            );
        }
        if let Some(&game) = found.first() {
            return game;
        }
        if file_version < PACKAGE_V2 {
            Game::UE1
        } else if file_version < PACKAGE_V3 {
            Game::UE2
        } else {
            Game::UE3
        }
    }

    /// Set `version.game`. A forced game always wins; a game already
    /// attributed by a package tag or a title cipher stays. The Lineage 2
    /// cipher is shared with Exteel, told apart by licensee 1000 and above.
    pub fn detect_game(&self, version: &mut ArchiveVersion, forced: Option<Game>) {
        if let Some(game) = forced {
            version.game = game;
            return;
        }
        if version.game == Game::LINEAGE2 {
            if version.licensee_version >= 1000 {
                version.game = Game::EXTEEL;
            }
            return;
        }
        if version.game.engine() == Engine::UE4 {
            version.game = Game::ue4(ue4_minor_for_version(version.file_version));
            return;
        }
        if version.game != Game::UNKNOWN {
            return;
        }
        version.game = self.detect_from_signature(version.file_version, version.licensee_version);
    }

    /// Rewrite versions some titles stamp incorrectly.
    pub fn override_version(&self, version: &mut ArchiveVersion, forced_version: Option<i32>) {
        let old = (version.file_version, version.licensee_version);
        match version.game {
            Game::END_WAR => version.file_version = 224,
            Game::TERA => version.file_version = 568,
            Game::HUNTED => version.file_version = 708,
            Game::DND => version.file_version = 673,
            Game::MASS_EFFECT => version.licensee_version = 90,
            Game::TRANSFORMERS if version.licensee_version >= 181 => version.file_version = 566,
            Game::SPECIAL_FORCE2 if version.licensee_version >= 14 => version.file_version = 710,
            Game::SPECIAL_FORCE2 if version.licensee_version == 9 => version.file_version = 700,
            Game::GOWJ => version.file_version = 828,
            _ => {}
        }
        if let Some(forced) = forced_version {
            version.file_version = forced;
        }
        if old != (version.file_version, version.licensee_version) {
            tracing::info!(
                "overrode version {}/{} -> {}/{}",
                old.0,
                old.1,
                version.file_version,
                version.licensee_version
            );
        }
    }
}

/// Detect using the built-in catalog and the process-wide forced game.
pub fn detect_game(version: &mut ArchiveVersion) {
    GameCatalog::new().detect_game(version, forced_game());
}

/// Override using the built-in catalog and the process-wide forced version.
pub fn override_version(version: &mut ArchiveVersion) {
    GameCatalog::new().override_version(version, forced_version());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(file_version: i32, licensee_version: i32) -> ArchiveVersion {
        ArchiveVersion {
            file_version,
            licensee_version,
            ..Default::default()
        }
    }

    #[test]
    fn test_engine_bits() {
        assert_eq!(Game::UT2.engine(), Engine::UE2);
        assert_eq!(Game::BIOSHOCK.engine(), Engine::Vengeance);
        assert_eq!(Game::UC2.engine(), Engine::UE2X);
        assert_eq!(Game::BORDERLANDS.engine(), Engine::UE3);
        assert_eq!(Game::MK.engine(), Engine::Midway3);
        assert_eq!(Game::ue4(26).engine(), Engine::UE4);
        assert_eq!(Game::UNKNOWN.engine(), Engine::Unknown);
        assert!(Game::MK.engine() > Engine::UE3);
        assert!(Game::ue4(0) > Game::MK);
    }

    #[test]
    fn test_lookup_by_tag() {
        let catalog = GameCatalog::new();
        assert_eq!(catalog.lookup_by_tag("border").unwrap(), Game::BORDERLANDS);
        assert_eq!(catalog.lookup_by_tag("BATMAN2").unwrap(), Game::BATMAN2);
        assert_eq!(catalog.lookup_by_tag("ue4.26").unwrap(), Game::ue4(26));
        assert_eq!(catalog.lookup_by_tag("ue4").unwrap(), Game::UE4_BASE);

        let err = catalog.lookup_by_tag("nosuchgame").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingResource);
        assert!(catalog.lookup_by_tag("ue4.99").is_err());
    }

    #[test]
    fn test_tag_for() {
        let catalog = GameCatalog::new();
        assert_eq!(catalog.tag_for(Game::TERA).as_deref(), Some("tera"));
        assert_eq!(catalog.tag_for(Game::ue4(26)).as_deref(), Some("ue4.26"));
        assert_eq!(catalog.tag_for(Game::PARIAH), None);
    }

    #[test]
    fn test_register_later_wins() {
        let mut catalog = GameCatalog::new();
        catalog.register([GameSignature::new("Remapped", "border", Game::UE3)]);
        assert_eq!(catalog.lookup_by_tag("border").unwrap(), Game::UE3);
    }

    #[test]
    fn test_every_rule_is_unique() {
        let catalog = GameCatalog::new();
        for rule in catalog.rules() {
            for (ver, lic) in [
                (rule.ver_min, rule.lic_min),
                (rule.ver_max, rule.lic_max),
                (rule.ver_min, rule.lic_max),
                (rule.ver_max, rule.lic_min),
            ] {
                let found = catalog.matching_games(ver, lic);
                assert_eq!(found, vec![rule.game], "{}/{}", ver, lic);
            }
        }
    }

    #[test]
    fn test_detect_known_titles() {
        let catalog = GameCatalog::new();
        assert_eq!(catalog.detect_from_signature(584, 57), Game::BORDERLANDS);
        assert_eq!(catalog.detect_from_signature(576, 21), Game::BATMAN);
        assert_eq!(catalog.detect_from_signature(128, 29), Game::UT2);
        assert_eq!(catalog.detect_from_signature(451, 52), Game::AVA);
        assert_eq!(catalog.detect_from_signature(451, 54), Game::UE3);
    }

    #[test]
    fn test_detect_generic_fallback() {
        let catalog = GameCatalog::new();
        assert_eq!(catalog.detect_from_signature(69, 0), Game::UE1);
        assert_eq!(catalog.detect_from_signature(99, 0), Game::UE1);
        assert_eq!(catalog.detect_from_signature(100, 0), Game::UE2);
        assert_eq!(catalog.detect_from_signature(179, 0), Game::UE2);
        assert_eq!(catalog.detect_from_signature(180, 0), Game::UE3);
        assert_eq!(catalog.detect_from_signature(369, 0), Game::UE3);
    }

    #[test]
    fn test_forced_game_wins() {
        let catalog = GameCatalog::new();
        let mut v = version(584, 57);
        catalog.detect_game(&mut v, Some(Game::TERA));
        assert_eq!(v.game, Game::TERA);
    }

    #[test]
    fn test_lineage_becomes_exteel() {
        let catalog = GameCatalog::new();
        let mut v = version(123, 1001);
        v.game = Game::LINEAGE2;
        catalog.detect_game(&mut v, None);
        assert_eq!(v.game, Game::EXTEEL);
    }

    #[test]
    fn test_ue4_minor_from_version() {
        assert_eq!(ue4_minor_for_version(342), 0);
        assert_eq!(ue4_minor_for_version(400), 4);
        assert_eq!(ue4_minor_for_version(482), 10);
        assert_eq!(ue4_minor_for_version(522), 27);
        assert_eq!(ue4_minor_for_legacy(-3).unwrap(), 0);
        assert_eq!(ue4_minor_for_legacy(-7).unwrap(), 14);
        assert!(ue4_minor_for_legacy(-1).is_err());
        assert!(ue4_minor_for_legacy(-8).is_err());

        let catalog = GameCatalog::new();
        let mut v = version(517, 0);
        v.game = Game::UE4_BASE;
        catalog.detect_game(&mut v, None);
        assert_eq!(v.game, Game::ue4(23));
    }

    #[test]
    fn test_override_version() {
        let catalog = GameCatalog::new();

        let mut v = version(610, 14);
        v.game = Game::TERA;
        catalog.override_version(&mut v, None);
        assert_eq!(v.file_version, 568);

        let mut v = version(846, 181);
        v.game = Game::TRANSFORMERS;
        catalog.override_version(&mut v, None);
        assert_eq!(v.file_version, 566);

        let mut v = version(904, 9);
        v.game = Game::SPECIAL_FORCE2;
        catalog.override_version(&mut v, None);
        assert_eq!(v.file_version, 700);

        let mut v = version(491, 1008);
        v.game = Game::MASS_EFFECT;
        catalog.override_version(&mut v, None);
        assert_eq!((v.file_version, v.licensee_version), (491, 90));

        let mut v = version(584, 57);
        v.game = Game::BORDERLANDS;
        catalog.override_version(&mut v, Some(600));
        assert_eq!(v.file_version, 600);
    }
}
