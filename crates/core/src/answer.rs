//! Grounded answer composition: cache, strict/permissive prompting and
//! translation of model failures into guidance for the user.

use crate::error::FailureKind;
use crate::llm::KNOWN_MODELS;
use crate::traits::{ChatMessage, ChatModel, CompletionRequest};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Strict mode refuses to call the model with this much context or less.
pub const STRICT_MIN_CONTEXT_CHARS: usize = 200;
/// Generic failures degrade to raw context only above this size.
pub const FALLBACK_MIN_CONTEXT_CHARS: usize = 300;
pub const FALLBACK_CONTEXT_CHARS: usize = 800;
/// Only answers longer than this are cached.
pub const CACHEABLE_ANSWER_CHARS: usize = 50;
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

pub const MAX_OUTPUT_TOKENS: u32 = 1_200;
pub const TOP_P: f32 = 0.85;
pub const STRICT_TEMPERATURE: f32 = 0.3;
pub const PERMISSIVE_TEMPERATURE: f32 = 0.6;

pub const NO_INPUT_MESSAGE: &str = "El mensaje está vacío. Escribe una pregunta sobre aves o rutas de avistamiento.";

pub const MISSING_CREDENTIAL_MESSAGE: &str = "Error de configuración del asistente: el servicio de IA no está disponible. \
Define GROQ_API_KEY en el archivo .env y reinicia el servicio.";

pub const INSUFFICIENT_CONTEXT_MESSAGE: &str = "No encontré información específica sobre tu pregunta en los documentos cargados.\n\n\
- Prueba el modo investigativo (no estricto)\n\
- Verifica que los documentos traten el tema\n\
- Reformula la pregunta con otros términos";

pub const EMPTY_GENERATION_MESSAGE: &str = "No pude generar una respuesta en este momento.";

const UNAUTHORIZED_MESSAGE: &str = "Error de autenticación: la API key de Groq no es válida o expiró.\n\n\
1. Genera una nueva clave en https://console.groq.com/keys\n\
2. Actualiza GROQ_API_KEY en el archivo .env\n\
3. Reinicia el servicio";

const RATE_LIMITED_MESSAGE: &str = "Se superó el límite de solicitudes al servicio de IA.\n\n\
Espera unos minutos antes de volver a preguntar o amplía el plan contratado.";

const SYSTEM_PROMPT: &str = "Eres un asistente experto en aves de Colombia y en aviturismo. \
Responde siempre en español, de forma clara y educativa.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    question: String,
    strict: bool,
}

impl CacheKey {
    fn new(question: &str, strict: bool) -> Self {
        Self {
            question: question.trim().to_lowercase(),
            strict,
        }
    }
}

/// Answer cache bounded by entry count; the oldest entry is evicted first.
///
/// Every [`AnswerCache::clear`] starts a new generation. Answers computed
/// against an earlier generation are refused by
/// [`AnswerCache::insert_for_generation`].
#[derive(Debug)]
pub struct AnswerCache {
    capacity: usize,
    generation: u64,
    entries: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

impl AnswerCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            generation: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, question: &str, strict: bool) -> Option<&str> {
        self.entries
            .get(&CacheKey::new(question, strict))
            .map(String::as_str)
    }

    pub fn insert(&mut self, question: &str, strict: bool, answer: String) {
        if self.capacity == 0 {
            return;
        }

        let key = CacheKey::new(question, strict);
        if self.entries.insert(key.clone(), answer).is_some() {
            return;
        }

        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn insert_for_generation(
        &mut self,
        generation: u64,
        question: &str,
        strict: bool,
        answer: String,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.insert(question, strict, answer);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedChatModel = Arc<dyn ChatModel + Send + Sync>;

pub struct AnswerComposer {
    model: Option<SharedChatModel>,
    model_name: String,
    cache: Mutex<AnswerCache>,
}

impl AnswerComposer {
    pub fn new(model: Option<SharedChatModel>, model_name: impl Into<String>, cache_capacity: usize) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            cache: Mutex::new(AnswerCache::new(cache_capacity)),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Current cache generation. Capture it before reading the corpus that
    /// will feed [`AnswerComposer::answer_for_generation`].
    pub async fn cache_generation(&self) -> u64 {
        self.cache.lock().await.generation()
    }

    pub async fn cached_answers(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Answers `question` from `context`. Always returns text; failures are
    /// turned into guidance messages and are never cached.
    pub async fn answer(&self, question: &str, context: &str, strict: bool) -> String {
        let generation = self.cache_generation().await;
        self.answer_for_generation(generation, question, context, strict)
            .await
    }

    /// Like [`AnswerComposer::answer`], but the generated answer is only
    /// cached if no clear happened since `generation` was observed.
    pub async fn answer_for_generation(
        &self,
        generation: u64,
        question: &str,
        context: &str,
        strict: bool,
    ) -> String {
        if let Some(cached) = self.cache.lock().await.get(question, strict) {
            debug!("answer served from cache");
            return cached.to_string();
        }

        let Some(model) = self.model.as_ref() else {
            warn!("no generative model configured");
            return MISSING_CREDENTIAL_MESSAGE.to_string();
        };

        let context_chars = context.chars().count();
        if strict && context_chars <= STRICT_MIN_CONTEXT_CHARS {
            return INSUFFICIENT_CONTEXT_MESSAGE.to_string();
        }

        let request = self.build_request(question, context, strict);
        info!(model = %self.model_name, strict, context_chars, "requesting completion");

        match model.complete(&request).await {
            Ok(generated) => {
                let trimmed = generated.trim();
                let answer = if trimmed.is_empty() {
                    EMPTY_GENERATION_MESSAGE.to_string()
                } else {
                    trimmed.to_string()
                };

                if answer.chars().count() > CACHEABLE_ANSWER_CHARS
                    && !self
                        .cache
                        .lock()
                        .await
                        .insert_for_generation(generation, question, strict, answer.clone())
                {
                    debug!("corpus changed during generation; answer not cached");
                }
                answer
            }
            Err(error) => {
                warn!(model = %self.model_name, %error, "completion failed");
                self.failure_message(error.kind(), &error.to_string(), context)
            }
        }
    }

    fn build_request(&self, question: &str, context: &str, strict: bool) -> CompletionRequest {
        let prompt = if strict {
            format!(
                "Responde ÚNICAMENTE con la información del contexto.\n\n\
                 CONTEXTO:\n{context}\n\n\
                 PREGUNTA: {question}\n\n\
                 Si el contexto no basta para responder, indica con claridad qué información falta."
            )
        } else {
            format!(
                "Combina la información del contexto con tu conocimiento general de ornitología.\n\n\
                 CONTEXTO:\n{context}\n\n\
                 PREGUNTA: {question}\n\n\
                 Apóyate principalmente en el contexto y complétalo con conocimiento general cuando sea útil."
            )
        };

        CompletionRequest {
            model: self.model_name.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: if strict {
                STRICT_TEMPERATURE
            } else {
                PERMISSIVE_TEMPERATURE
            },
            max_tokens: MAX_OUTPUT_TOKENS,
            top_p: TOP_P,
        }
    }

    fn failure_message(&self, kind: FailureKind, detail: &str, context: &str) -> String {
        match kind {
            FailureKind::UnknownModel => format!(
                "Error: el modelo \"{}\" no está disponible en Groq.\n\n\
                 Actualiza GROQ_MODEL en el archivo .env con uno de estos modelos y reinicia el servicio:\n\n{}",
                self.model_name,
                KNOWN_MODELS
                    .iter()
                    .map(|model| format!("- {model}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            FailureKind::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            FailureKind::RateLimited => RATE_LIMITED_MESSAGE.to_string(),
            FailureKind::Other if context.chars().count() > FALLBACK_MIN_CONTEXT_CHARS => {
                let excerpt = context.chars().take(FALLBACK_CONTEXT_CHARS).collect::<String>();
                format!(
                    "Información encontrada en los documentos:\n\n{excerpt}...\n\n\
                     (No se pudo generar una respuesta completa por un error del servicio de IA.)"
                )
            }
            FailureKind::Other => format!(
                "Error con el servicio de IA.\n\nDetalles: {detail}\n\n\
                 Verifica la configuración o inténtalo de nuevo más tarde."
            ),
        }
    }
}
