// Copyright (c) 2023 Mike Tsao. All rights reserved.

use super::patch::{bank_patch_names, bank_sysex, bank_voices, Patch, VOICES_PER_BANK};
use crate::error::Result;
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

/// Where the DX7 finds its voice banks. Banks are organized into named
/// groups, and each bank is a 32-voice bulk dump.
pub trait BankStore: Send + Sync + Debug {
    /// Group names, in index order.
    fn groups(&self) -> Vec<String>;

    /// Bank names in `group`, in index order. Empty if `group` is out of
    /// range.
    fn banks(&self, group: usize) -> Vec<String>;

    /// The bulk dump for one bank.
    fn bank(&self, group: usize, bank: usize) -> Option<&[u8]>;

    /// Voice names in one bank.
    fn patches(&self, group: usize, bank: usize) -> Vec<String> {
        self.bank(group, bank)
            .map(bank_patch_names)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct BankGroup {
    name: String,
    banks: Vec<(String, Vec<u8>)>,
}

fn group_names(groups: &[BankGroup]) -> Vec<String> {
    groups.iter().map(|g| g.name.clone()).collect()
}

fn bank_names(groups: &[BankGroup], group: usize) -> Vec<String> {
    groups
        .get(group)
        .map(|g| g.banks.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default()
}

fn bank_data(groups: &[BankGroup], group: usize, bank: usize) -> Option<&[u8]> {
    groups
        .get(group)
        .and_then(|g| g.banks.get(bank))
        .map(|(_, data)| data.as_slice())
}

/// A single generated bank that walks through all 32 algorithms, so that
/// the DX7 always has something to play.
#[derive(Debug)]
pub struct BuiltInBanks {
    groups: Vec<BankGroup>,
}
impl Default for BuiltInBanks {
    fn default() -> Self {
        let patches: Vec<Patch> = (0..VOICES_PER_BANK).map(Self::algorithm_voice).collect();
        Self {
            groups: vec![BankGroup {
                name: "Built-in".to_string(),
                banks: vec![("Algorithms".to_string(), bank_sysex(&patches))],
            }],
        }
    }
}
impl BuiltInBanks {
    fn algorithm_voice(index: usize) -> Patch {
        let mut patch = Patch::init_voice();
        patch.name = format!("ALGO {:02}", index + 1);
        patch.algorithm = index as u8;
        patch.feedback = 5;
        let algorithm = &super::fm::ALGORITHMS[index];
        for (i, op) in patch.operators.iter_mut().enumerate() {
            op.rates = [95, 40, 30, 60];
            op.levels = [99, 88, 75, 0];
            op.velocity_sensitivity = 3;
            if algorithm.is_carrier(i) {
                op.output_level = 99;
                op.coarse = 1;
            } else {
                op.output_level = 72;
                op.coarse = (i % 3) as u8 + 1;
            }
        }
        patch
    }
}
impl BankStore for BuiltInBanks {
    fn groups(&self) -> Vec<String> {
        group_names(&self.groups)
    }

    fn banks(&self, group: usize) -> Vec<String> {
        bank_names(&self.groups, group)
    }

    fn bank(&self, group: usize, bank: usize) -> Option<&[u8]> {
        bank_data(&self.groups, group, bank)
    }
}

/// Banks loaded from disk. Each subfolder of the root is a group, and each
/// `.syx` file in it is a bank. Both are sorted by name.
#[derive(Debug, Default)]
pub struct SyxFolderBanks {
    groups: Vec<BankGroup>,
}
impl SyxFolderBanks {
    /// Reads every bank under `path`. Files that aren't 32-voice bulk dumps
    /// are skipped with a warning, and groups with no usable banks are left
    /// out.
    pub fn load(path: &Path) -> Result<Self> {
        let mut folders: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        folders.sort();

        let mut groups = Vec::default();
        for folder in folders {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&folder)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("syx"))
                })
                .collect();
            files.sort();

            let mut banks = Vec::default();
            for file in files {
                let data = std::fs::read(&file)?;
                if let Err(e) = bank_voices(&data) {
                    log::warn!(target: "Dx7", "skipping {}: {e}", file.display());
                    continue;
                }
                banks.push((file_stem(&file), data));
            }
            if !banks.is_empty() {
                groups.push(BankGroup {
                    name: file_stem(&folder),
                    banks,
                });
            }
        }
        log::info!(target: "Dx7", "loaded {} bank groups from {}", groups.len(), path.display());
        Ok(Self { groups })
    }
}
impl BankStore for SyxFolderBanks {
    fn groups(&self) -> Vec<String> {
        group_names(&self.groups)
    }

    fn banks(&self, group: usize) -> Vec<String> {
        bank_names(&self.groups, group)
    }

    fn bank(&self, group: usize, bank: usize) -> Option<&[u8]> {
        bank_data(&self.groups, group, bank)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_bank() {
        let banks = BuiltInBanks::default();
        assert_eq!(banks.groups(), vec!["Built-in".to_string()]);
        assert_eq!(banks.banks(0), vec!["Algorithms".to_string()]);
        assert!(banks.banks(1).is_empty());
        assert!(banks.bank(0, 1).is_none());

        let names = banks.patches(0, 0);
        assert_eq!(names.len(), VOICES_PER_BANK);
        assert_eq!(names[0], "ALGO 01");
        assert_eq!(names[31], "ALGO 32");

        let voices = bank_voices(banks.bank(0, 0).unwrap()).unwrap();
        let patch = Patch::unpack(&voices[128 * 7..]).unwrap();
        assert_eq!(patch.algorithm, 7);
    }

    #[test]
    fn loads_folders() {
        let dir = tempfile::tempdir().unwrap();
        let factory = dir.path().join("Factory");
        let extra = dir.path().join("Extra");
        std::fs::create_dir(&factory).unwrap();
        std::fs::create_dir(&extra).unwrap();
        std::fs::create_dir(dir.path().join("Empty")).unwrap();

        let dump = bank_sysex(&[Patch::init_voice()]);
        std::fs::write(factory.join("rom2.syx"), &dump).unwrap();
        std::fs::write(factory.join("rom1.SYX"), &dump).unwrap();
        std::fs::write(factory.join("notes.txt"), b"not a bank").unwrap();
        std::fs::write(extra.join("broken.syx"), b"\xf0\x43 too short").unwrap();
        std::fs::write(extra.join("good.syx"), &dump).unwrap();

        let banks = SyxFolderBanks::load(dir.path()).unwrap();
        assert_eq!(banks.groups(), vec!["Extra".to_string(), "Factory".to_string()]);
        assert_eq!(banks.banks(0), vec!["good".to_string()]);
        assert_eq!(banks.banks(1), vec!["rom1".to_string(), "rom2".to_string()]);
        assert_eq!(banks.patches(1, 0)[0], "INIT VOICE");
        assert!(banks.bank(2, 0).is_none());
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SyxFolderBanks::load(&dir.path().join("nope")).is_err());
    }
}
