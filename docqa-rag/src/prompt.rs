//! Prompt assembly and the section-marker grammar shared with the assembler.
//!
//! Every prompt asks the model for four sections, in this order, each opened
//! by a literal marker line. The assembler searches for the same literals.

use crate::document::RankedResult;

/// Opens the primary answer section.
pub const MAIN_MARKER: &str = "=== JAWABAN UTAMA ===";
/// Opens the conclusion section.
pub const CONCLUSION_MARKER: &str = "=== KESIMPULAN ===";
/// Opens the practical suggestions section.
pub const SUGGESTIONS_MARKER: &str = "=== SARAN PRAKTIS ===";
/// Opens the document sources section.
pub const SOURCES_MARKER: &str = "=== SUMBER DOKUMEN ===";

/// Lower-case text the model writes when it has no suggestions to give.
pub const NO_SUGGESTIONS_SENTINEL: &str = "tidak ada saran";

/// Substrings that mark a question about drop-out or academic sanctions.
const WITHDRAWAL_KEYWORDS: [&str; 5] =
    ["drop out", "dropout", "sanksi", "pemutusan", "dikeluarkan"];

/// Which prompt template a question gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// Any regulation question.
    General,
    /// Drop-out / sanction questions, answered per study programme level.
    Withdrawal,
}

impl QuestionKind {
    /// Classify a query by keyword membership.
    pub fn classify(query: &str) -> Self {
        let lower = query.to_lowercase();
        if WITHDRAWAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
            QuestionKind::Withdrawal
        } else {
            QuestionKind::General
        }
    }
}

/// An assembled prompt and the documents it cites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// The full instruction text sent to the model.
    pub text: String,
    /// Source documents of the context passages, first-seen order, no duplicates.
    pub sources: Vec<String>,
    /// The template that was used.
    pub kind: QuestionKind,
}

/// Builds the single instruction prompt for a question.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    /// Create a prompt builder.
    pub fn new() -> Self {
        Self
    }

    /// Assemble the prompt for `query` from the ranked passages.
    pub fn build(&self, query: &str, ranked: &RankedResult) -> Prompt {
        let sources = group_sources(ranked);
        let source_list =
            sources.iter().map(|source| format!("- {source}")).collect::<Vec<_>>().join("\n");
        let context =
            ranked.chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>().join("\n\n");

        let kind = QuestionKind::classify(query);
        let instructions = match kind {
            QuestionKind::General => general_instructions(),
            QuestionKind::Withdrawal => withdrawal_instructions(),
        };

        let text = format!(
            "Anda adalah asisten AI untuk Universitas Andalas yang ahli dalam peraturan akademik.\n\
             \n\
             DOKUMEN PERATURAN YANG TERSEDIA:\n\
             {source_list}\n\
             \n\
             KONTEN DOKUMEN:\n\
             {context}\n\
             \n\
             PERTANYAAN: {query}\n\
             \n\
             INSTRUKSI OUTPUT - Berikan respons LENGKAP dalam format SANGAT TERSTRUKTUR berikut:\n\
             \n\
             {instructions}"
        );

        Prompt { text, sources, kind }
    }
}

/// Unique source documents of the ranked passages, in first-seen order.
pub fn group_sources(ranked: &RankedResult) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in &ranked.chunks {
        if !sources.contains(&chunk.source_id) {
            sources.push(chunk.source_id.clone());
        }
    }
    sources
}

fn general_instructions() -> String {
    format!(
        "{MAIN_MARKER}
[WAJIB ikuti struktur ini:

1. Paragraf pembuka (2-3 kalimat):
   - Mulai dengan \"Berdasarkan dokumen [nama peraturan], ...\"
   - Jelaskan konteks umum dari pertanyaan

2. Isi jawaban dengan format yang SANGAT RAPI:
   - Gunakan numbering (1. 2. 3.) untuk poin utama
   - Gunakan bullet points (•) untuk sub-poin di bawah setiap nomor
   - Gunakan **bold** untuk judul/kategori penting
   - Pisahkan setiap poin dengan spasi kosong untuk readability

3. Referensi:
   - Selalu cantumkan sumber di akhir setiap section penting
   - Format: \"Referensi: Pasal [X], [Nama Peraturan]\"

PENTING: Integrasikan SEMUA dokumen yang relevan]

{CONCLUSION_MARKER}
[Tulis 2-3 kalimat ringkasan yang padat dan jelas, mencakup poin-poin utama dari jawaban di atas.]

{SUGGESTIONS_MARKER}
[Berikan 3 saran konkret dalam format numbered list:
1. [Saran pertama yang actionable]
2. [Saran kedua yang spesifik]
3. [Saran ketiga yang relevan]

Jika benar-benar tidak ada saran yang relevan, tulis \"Tidak ada saran khusus untuk pertanyaan ini.\"]

{SOURCES_MARKER}
[Untuk setiap dokumen yang digunakan:

Dokumen: [nama file lengkap]
Informasi: [Penjelasan 2-3 kalimat tentang apa yang dijelaskan dokumen ini terkait pertanyaan, termasuk pasal/bab yang spesifik]

(Ulangi untuk setiap dokumen relevan)]

KUALITAS OUTPUT: Pastikan jawaban sangat terstruktur, mudah dibaca, dan profesional seperti dokumen resmi universitas."
    )
}

fn withdrawal_instructions() -> String {
    format!(
        "{MAIN_MARKER}
[WAJIB ikuti struktur ini untuk pertanyaan tentang drop out/sanksi:

Berdasarkan dokumen [nama peraturan lengkap], persyaratan drop out/pemutusan studi di Universitas Andalas diatur berdasarkan jenjang program pendidikan sebagai berikut:

**Persyaratan Drop Out per Jenjang Program:**

1. **Program Sarjana (S1):**
   Mahasiswa dinyatakan drop out apabila:
   • [Syarat dengan detail lengkap]

2. **Program Diploma III (D3):**
   Drop out diberlakukan apabila:
   • [Syarat dengan detail lengkap]

3. **Program Magister (S2)** dan 4. **Program Doktor (S3):**
   (Jika ada dalam dokumen, jelaskan dengan format yang sama)

**Referensi:** Pasal [X], [Nama Peraturan Lengkap]

PENTING: Detail yang lengkap dan spesifik (semester, SKS, IPK, dll)]

{CONCLUSION_MARKER}
[Ringkasan 2-3 kalimat yang mencakup semua jenjang program yang dijelaskan.]

{SUGGESTIONS_MARKER}
[Berikan 3 saran untuk mahasiswa agar terhindar dari drop out:
1. [Saran pertama yang actionable]
2. [Saran kedua yang konkret]
3. [Saran ketiga yang praktis]]

{SOURCES_MARKER}
[Untuk setiap dokumen:

Dokumen: [nama file lengkap]
Informasi: [Penjelasan detail tentang bab/pasal yang mengatur drop out dalam dokumen ini]

(Ulangi untuk tiap dokumen)]

KUALITAS: Pastikan jawaban sangat terstruktur, rapi, dan mudah dipahami mahasiswa."
    )
}
