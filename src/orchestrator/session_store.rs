//! 会话存储 - 编排层
//!
//! 每个浏览器会话对应一个 `SessionHandle`，存放在并发 map 中。
//! 会话状态用异步互斥锁保护，只在短暂的状态更新时加锁，不会跨越 API 调用。

use std::sync::Arc;

use chrono::Local;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppResult, SessionError};
use crate::models::document::{Document, DocumentInfo};
use crate::models::session::{RunSettings, Session, SessionSnapshot};

/// 单个会话及其运行中的任务
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    session: Mutex<Session>,
    /// 当前运行的 (generation, 取消令牌)
    run: Mutex<Option<(u64, CancellationToken)>>,
}

impl SessionHandle {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            session: Mutex::new(Session::new(id)),
            run: Mutex::new(None),
        }
    }

    /// 在 generation 未变化的前提下修改会话
    ///
    /// 会话被重置或换了文档后，旧任务的写入一律返回 `Cancelled`。
    pub async fn commit<T>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut Session) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut session = self.session.lock().await;
        if session.generation() != generation {
            return Err(SessionError::Cancelled.into());
        }
        f(&mut session)
    }

    /// 只读访问
    pub async fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> T {
        let session = self.session.lock().await;
        f(&session)
    }

    /// 取消当前运行（如果有）
    async fn cancel_run(&self) {
        if let Some((generation, token)) = self.run.lock().await.take() {
            debug!("取消会话 {} 的运行 (generation {})", self.id, generation);
            token.cancel();
        }
    }

    /// 运行结束后清理取消令牌，只清理属于自己的那一个
    pub async fn finish_run(&self, generation: u64) {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|(g, _)| *g == generation) {
            *run = None;
        }
    }
}

/// 一次已获准的运行
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub handle: Arc<SessionHandle>,
    pub generation: u64,
    pub document: Arc<Document>,
    pub settings: RunSettings,
    pub cancel: CancellationToken,
}

/// 会话存储
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建新会话
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, Arc::new(SessionHandle::new(id)));
        info!("🆕 创建会话 {} (当前共 {} 个)", id, self.sessions.len());
        id
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 解析路径中的会话 ID，格式错误视为不存在
    pub fn parse_id(raw: &str) -> AppResult<Uuid> {
        Uuid::parse_str(raw).map_err(|_| SessionError::NotFound(raw.to_string()).into())
    }

    pub fn get(&self, id: &Uuid) -> AppResult<Arc<SessionHandle>> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()).into())
    }

    pub async fn snapshot(&self, id: &Uuid) -> AppResult<SessionSnapshot> {
        let handle = self.get(id)?;
        Ok(handle.read(|s| s.snapshot()).await)
    }

    fn is_registered(&self, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .get(&handle.id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), handle))
    }

    /// 替换会话文档
    pub async fn load_document(&self, id: &Uuid, document: Document) -> AppResult<DocumentInfo> {
        let handle = self.get(id)?;
        let mut session = handle.session.lock().await;
        let info = document.info();
        session.set_document(document)?;
        Ok(info)
    }

    /// 校验并开始一次运行
    ///
    /// 问答轮数、文档、状态都在这里校验，任何 API 调用之前完成。
    pub async fn begin_run(&self, id: &Uuid, settings: RunSettings) -> AppResult<RunTicket> {
        let handle = self.get(id)?;
        self.start_run(&handle, settings).await
    }

    async fn start_run(
        &self,
        handle: &Arc<SessionHandle>,
        settings: RunSettings,
    ) -> AppResult<RunTicket> {
        let mut session = handle.session.lock().await;
        // 等锁期间会话可能已被回收
        if !self.is_registered(handle) {
            return Err(SessionError::NotFound(handle.id.to_string()).into());
        }

        let document = session.begin(settings.clone())?;
        let generation = session.generation();
        let cancel = CancellationToken::new();
        *handle.run.lock().await = Some((generation, cancel.clone()));
        drop(session);

        Ok(RunTicket {
            handle: handle.clone(),
            generation,
            document,
            settings,
            cancel,
        })
    }

    /// 重置会话：取消运行中的任务，清空全部内容
    pub async fn reset(&self, id: &Uuid) -> AppResult<()> {
        let handle = self.get(id)?;
        handle.cancel_run().await;
        handle.session.lock().await.reset();
        info!("🔄 会话 {} 已重置", id);
        Ok(())
    }

    /// 删除会话
    pub async fn remove(&self, id: &Uuid) -> AppResult<()> {
        let (_, handle) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        handle.cancel_run().await;
        info!("🗑️  删除会话 {}", id);
        Ok(())
    }

    /// 回收长时间不活跃且没有运行任务的会话
    pub async fn evict_idle(&self, ttl: chrono::Duration) -> usize {
        // 先复制出句柄，避免持有 map 的锁时等待会话锁
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();

        let now = Local::now();
        let mut evicted = 0;
        for handle in handles {
            // 持有会话锁直到移出 map，开始运行必须先拿到同一把锁
            let session = handle.session.lock().await;
            let expired = !session.state().is_active() && now - session.last_active >= ttl;
            if expired
                && self
                    .sessions
                    .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, &handle))
                    .is_some()
            {
                evicted += 1;
            }
            drop(session);
        }

        if evicted > 0 {
            info!("🧹 回收 {} 个空闲会话，剩余 {}", evicted, self.sessions.len());
        }
        evicted
    }
}
