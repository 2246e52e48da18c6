use super::{ResourceRequirements, Template};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Ids of the templates shipped with the orchestrator.
pub fn builtin_ids() -> Vec<&'static str> {
    vec![
        "minecraft-vanilla",
        "minecraft-forge",
        "csgo-competitive",
        "rust-vanilla",
        "gmod-darkrp",
        "valheim-dedicated",
    ]
}

/// The templates shipped with the orchestrator.
pub fn builtin_templates() -> Vec<Template> {
    vec![
        Template {
            id: "minecraft-vanilla".to_string(),
            name: "Minecraft Vanilla".to_string(),
            game: "Minecraft".to_string(),
            description: "Official Minecraft server with no modifications".to_string(),
            version: "1.20.4".to_string(),
            category: "vanilla".to_string(),
            image: "itzg/minecraft-server:latest".to_string(),
            env: strings(&["EULA=TRUE", "TYPE=VANILLA"]),
            ports: strings(&["25565"]),
            volumes: strings(&["/data"]),
            start_command: None,
            requirements: ResourceRequirements {
                cpu: 2.0,
                memory_mb: 2048,
                disk_mb: 1024,
            },
        },
        Template {
            id: "minecraft-forge".to_string(),
            name: "Minecraft Modded (Forge)".to_string(),
            game: "Minecraft".to_string(),
            description: "Minecraft server with Forge mod loader pre-installed".to_string(),
            version: "1.20.1".to_string(),
            category: "modded".to_string(),
            image: "itzg/minecraft-server:latest".to_string(),
            env: strings(&["EULA=TRUE", "TYPE=FORGE"]),
            ports: strings(&["25565"]),
            volumes: strings(&["/data"]),
            start_command: None,
            requirements: ResourceRequirements {
                cpu: 4.0,
                memory_mb: 4096,
                disk_mb: 2048,
            },
        },
        Template {
            id: "csgo-competitive".to_string(),
            name: "CS:GO Competitive".to_string(),
            game: "CS:GO".to_string(),
            description: "Counter-Strike: Global Offensive competitive server setup".to_string(),
            version: "Latest".to_string(),
            category: "fps".to_string(),
            image: "cm2network/csgo:latest".to_string(),
            env: strings(&["SRCDS_TOKEN="]),
            ports: strings(&["27015", "27015/udp"]),
            volumes: strings(&["/home/steam/csgo-dedicated"]),
            start_command: Some(strings(&[
                "./srcds_run",
                "-game",
                "csgo",
                "-console",
                "-usercon",
                "+game_type",
                "1",
            ])),
            requirements: ResourceRequirements {
                cpu: 2.0,
                memory_mb: 1024,
                disk_mb: 512,
            },
        },
        Template {
            id: "rust-vanilla".to_string(),
            name: "Rust Vanilla".to_string(),
            game: "Rust".to_string(),
            description: "Official Rust server with standard gameplay".to_string(),
            version: "Latest".to_string(),
            category: "survival".to_string(),
            image: "didstopia/rust-server:latest".to_string(),
            env: strings(&["RUST_SERVER_NAME=GameHost Server"]),
            ports: strings(&["28015", "28015/udp"]),
            volumes: strings(&["/steamcmd/rust"]),
            start_command: None,
            requirements: ResourceRequirements {
                cpu: 4.0,
                memory_mb: 8192,
                disk_mb: 5120,
            },
        },
        Template {
            id: "gmod-darkrp".to_string(),
            name: "Garry's Mod DarkRP".to_string(),
            game: "Garry's Mod".to_string(),
            description: "Popular roleplay gamemode for Garry's Mod".to_string(),
            version: "Latest".to_string(),
            category: "roleplay".to_string(),
            image: "cm2network/gmod:latest".to_string(),
            env: strings(&["SRCDS_TOKEN=", "GAMEMODE=darkrp"]),
            ports: strings(&["27015", "27015/udp"]),
            volumes: strings(&["/home/steam/gmod-dedicated"]),
            start_command: None,
            requirements: ResourceRequirements {
                cpu: 2.0,
                memory_mb: 2048,
                disk_mb: 1024,
            },
        },
        Template {
            id: "valheim-dedicated".to_string(),
            name: "Valheim Dedicated".to_string(),
            game: "Valheim".to_string(),
            description: "Dedicated Valheim server for Viking adventures".to_string(),
            version: "Latest".to_string(),
            category: "survival".to_string(),
            image: "lloesche/valheim-server:latest".to_string(),
            env: strings(&["SERVER_NAME=GameHost Valheim", "WORLD_NAME=GameHost"]),
            ports: strings(&["2456/udp", "2457/udp"]),
            volumes: strings(&["/config", "/opt/valheim"]),
            start_command: None,
            requirements: ResourceRequirements {
                cpu: 2.0,
                memory_mb: 2048,
                disk_mb: 1024,
            },
        },
    ]
}
