use crate::{
    domain::{Board, BoardId, Card, CardId, List, ListId},
    error::{EntityKind, Result, SyncError},
    storage::Storage,
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::fs;

/// File-based storage implementation: one JSON file per record
pub struct FileStorage {
    root_path: PathBuf,
}

impl FileStorage {
    const DATA_DIR: &'static str = ".hlavi-boards";
    const BOARDS_DIR: &'static str = "boards";
    const LISTS_DIR: &'static str = "lists";
    const CARDS_DIR: &'static str = "cards";

    /// Creates a new FileStorage instance for the given project root
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            root_path: project_root.as_ref().join(Self::DATA_DIR),
        }
    }

    fn boards_dir(&self) -> PathBuf {
        self.root_path.join(Self::BOARDS_DIR)
    }

    fn lists_dir(&self) -> PathBuf {
        self.root_path.join(Self::LISTS_DIR)
    }

    fn cards_dir(&self) -> PathBuf {
        self.root_path.join(Self::CARDS_DIR)
    }

    fn record_file(dir: PathBuf, id: &impl ToString) -> PathBuf {
        dir.join(format!("{}.json", id.to_string()))
    }

    async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).await?;
        }
        Ok(())
    }

    /// Writes to a sibling temp file first so readers never see a torn record
    async fn write_record<T: Serialize>(&self, dir: PathBuf, id: &impl ToString, record: &T) -> Result<()> {
        self.ensure_directory_exists(&dir).await?;

        let json = serde_json::to_string_pretty(record)?;
        let file_path = Self::record_file(dir, id);
        let tmp_path = file_path.with_extension("json.tmp");

        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &file_path).await?;
        Ok(())
    }

    async fn read_record<T: DeserializeOwned>(
        &self,
        dir: PathBuf,
        id: &impl ToString,
        kind: EntityKind,
    ) -> Result<T> {
        let file_path = Self::record_file(dir, id);

        if !file_path.exists() {
            return Err(SyncError::not_found(kind, id.to_string()));
        }

        let contents = fs::read_to_string(&file_path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn remove_record(&self, dir: PathBuf, id: &impl ToString, kind: EntityKind) -> Result<()> {
        let file_path = Self::record_file(dir, id);

        if !file_path.exists() {
            return Err(SyncError::not_found(kind, id.to_string()));
        }

        fs::remove_file(file_path).await?;
        Ok(())
    }

    /// Reads every record in a directory; files with foreign names are skipped
    async fn read_all<T: DeserializeOwned>(&self, dir: PathBuf) -> Result<Vec<T>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let is_record = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|stem| uuid::Uuid::from_str(stem).is_ok())
                .unwrap_or(false);
            if !is_record {
                continue;
            }

            let contents = fs::read_to_string(&path).await?;
            records.push(serde_json::from_str(&contents)?);
        }

        Ok(records)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn initialize(&self) -> Result<()> {
        self.ensure_directory_exists(&self.root_path).await?;
        self.ensure_directory_exists(&self.boards_dir()).await?;
        self.ensure_directory_exists(&self.lists_dir()).await?;
        self.ensure_directory_exists(&self.cards_dir()).await?;

        let gitignore_path = self.root_path.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(gitignore_path, "# Interrupted writes\n*.json.tmp\n").await?;
        }

        Ok(())
    }

    async fn save_board(&self, board: &Board) -> Result<()> {
        self.write_record(self.boards_dir(), &board.id, board).await
    }

    async fn load_board(&self, id: &BoardId) -> Result<Board> {
        self.read_record(self.boards_dir(), id, EntityKind::Board).await
    }

    async fn list_board_ids(&self) -> Result<Vec<BoardId>> {
        let boards: Vec<Board> = self.read_all(self.boards_dir()).await?;
        let mut ids: Vec<BoardId> = boards.into_iter().map(|b| b.id).collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_list(&self, list: &List) -> Result<()> {
        self.write_record(self.lists_dir(), &list.id, list).await
    }

    async fn load_list(&self, id: &ListId) -> Result<List> {
        self.read_record(self.lists_dir(), id, EntityKind::List).await
    }

    async fn delete_list(&self, id: &ListId) -> Result<()> {
        self.remove_record(self.lists_dir(), id, EntityKind::List).await
    }

    async fn lists_for_board(&self, board_id: &BoardId) -> Result<Vec<List>> {
        let lists: Vec<List> = self.read_all(self.lists_dir()).await?;
        Ok(lists
            .into_iter()
            .filter(|l| &l.board_id == board_id)
            .collect())
    }

    async fn save_card(&self, card: &Card) -> Result<()> {
        self.write_record(self.cards_dir(), &card.id, card).await
    }

    async fn load_card(&self, id: &CardId) -> Result<Card> {
        self.read_record(self.cards_dir(), id, EntityKind::Card).await
    }

    async fn delete_card(&self, id: &CardId) -> Result<()> {
        self.remove_record(self.cards_dir(), id, EntityKind::Card).await
    }

    async fn cards_for_list(&self, list_id: &ListId) -> Result<Vec<Card>> {
        let cards: Vec<Card> = self.read_all(self.cards_dir()).await?;
        Ok(cards
            .into_iter()
            .filter(|c| &c.list_id == list_id)
            .collect())
    }
}
