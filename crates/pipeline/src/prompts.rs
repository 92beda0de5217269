//! Prompt templates for every stage

use crate::stages::demographics::PatientRow;

pub const TRANSCRIPT_MIN_WORDS: u32 = 600;
pub const TRANSCRIPT_MAX_WORDS: u32 = 1200;

/// The four SOAP sections, in note order.
pub const SOAP_SECTIONS: [&str; 4] = ["subjective", "objective", "assessment", "plan"];

/// Paraphrase styles: slug and the instruction appended to the prompt.
pub const FORMAT_VARIANTS: [(&str, &str); 5] = [
    ("simple", "Rephrase in plain prose; keep structure similar."),
    ("bullets", "Rewrite as bullet points (-). Each line at most 20 words."),
    ("narrative", "Expand into a brief narrative paragraph (3-4 sentences)."),
    ("brev_bp", "Bullet list, each line at most 70 characters; be concise."),
    ("detailed", "Add clinical nuance and detail while preserving facts."),
];

const NO_FENCES: &str = "Do NOT wrap your response in markdown fences (```), headings, \
or any explanatory text. Return only plain JSON.";

pub fn complaints(count: usize) -> String {
    format!(
        "List the {count} most common chief complaints seen in family-practice / primary-care \
clinics in the USA and Canada. Return ONLY a JSON array of short phrases, each at most 6 words. \
Do NOT add code fences, numbering, or any extra text."
    )
}

pub fn refine_complaint(gender: &str, age: u32, base: &str) -> String {
    format!(
        "You are refining a primary-care chief complaint.\n\n\
Given:\n  gender: {gender}\n  age: {age}\n  baseline_complaint: \"{base}\"\n\n\
Return ONLY a JSON object on ONE line:\n\
{{\"chief_complaint\": \"<at most 8 words, stays on topic>\"}}"
    )
}

/// Facts block shared by the transcript and SOAP prompts. The rebuild
/// stage reads these lines back out of stored requests.
fn facts(row: &PatientRow) -> String {
    format!(
        "- gender: {}\n- age: {}\n- chief complaint: \"{}\"\n- smoker: {}, drinker: {}, BP: {}",
        row.gender, row.age, row.chief_complaint, row.smoker, row.drinker, row.blood_pressure
    )
}

pub fn transcript(row: &PatientRow) -> String {
    format!(
        "You are transcribing a 1-mic recording of a family-practice visit.\n\n\
Guidelines:\n\
- Continuous dialogue, no speaker labels.\n\
- Natural English; occasional fillers (\"uh-huh\", \"okay\").\n\
- {TRANSCRIPT_MIN_WORDS} - {TRANSCRIPT_MAX_WORDS} words total.\n\
- Include history-taking, brief exam cues, initial plan.\n\
- No PHI, no brand drug names, no mention of this being synthetic.\n\n\
Facts you MUST weave in naturally:\n{}\n\n\
Produce a unique, natural encounter built on these facts.\n\n\
Return ONLY a JSON object on ONE line:\n\
{{\"transcription\": \"full text here\"}}\n{NO_FENCES}",
        facts(row)
    )
}

pub fn soap_note(row: &PatientRow, transcription: &str) -> String {
    format!(
        "You are an expert clinical documentation specialist. \
Using the transcript and patient facts below, produce a SOAP note.\n\n\
Return ONE valid JSON object on a single line:\n\
{{\"subjective\": \"...\", \"objective\": \"...\", \"assessment\": \"...\", \"plan\": \"...\"}}\n\
Base strictly on the facts and transcription, no extra keys.\n\n\
Facts:\n{}\n\n\
Transcription:\n\"\"\"{transcription}\"\"\"\n\n{NO_FENCES}",
        facts(row)
    )
}

pub fn soap_section(row: &PatientRow, transcription: &str, section: &str) -> String {
    format!(
        "You are an expert clinical documentation specialist. \
Using the transcript and patient facts below, write only the {} section of a SOAP note.\n\n\
Return ONE valid JSON object on a single line:\n\
{{\"text\": \"...\"}}\n\n\
Facts:\n{}\n\n\
Transcription:\n\"\"\"{transcription}\"\"\"\n\n{NO_FENCES}",
        capitalize(section),
        facts(row)
    )
}

pub fn paraphrase(k: usize, section: &str, text: &str, style: &str) -> String {
    format!(
        "Return {k} alternative phrasings of the {} section as a JSON array of strings. \
Preserve clinical meaning; vary wording and sentence structure.\n\n\
Original:\n\"\"\"{text}\"\"\"\n\n{style}",
        capitalize(section)
    )
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinsynth_core::FactSchema;

    fn row() -> PatientRow {
        PatientRow {
            row_id: "row0003".into(),
            gender: "Non-binary".into(),
            age: 47,
            smoker: "Yes".into(),
            drinker: "No".into(),
            blood_pressure: "142/91".into(),
            chief_complaint: "persistent dry cough".into(),
        }
    }

    #[test]
    fn transcript_facts_are_recoverable() {
        let schema = FactSchema::patient_facts().unwrap();
        let facts = schema.extract(&transcript(&row())).unwrap();

        assert_eq!(facts["gender"], "Non-binary");
        assert_eq!(facts["age"], 47);
        assert_eq!(facts["smoker"], "Yes");
        assert_eq!(facts["drinker"], "No");
        assert_eq!(facts["blood_pressure"], "142/91");
        assert_eq!(facts["chief_complaint"], "persistent dry cough");
    }

    #[test]
    fn quoted_complaint_is_recovered_whole() {
        let mut row = row();
        row.chief_complaint = r#"feels "pins and needles" in feet"#.into();
        let facts = FactSchema::patient_facts()
            .unwrap()
            .extract(&transcript(&row))
            .unwrap();

        assert_eq!(facts["chief_complaint"], r#"feels "pins and needles" in feet"#);
        assert_eq!(facts["smoker"], "Yes");
    }

    #[test]
    fn section_prompts_name_the_section() {
        let prompt = soap_section(&row(), "...", "assessment");
        assert!(prompt.contains("Assessment section"));
        assert!(prompt.contains("{\"text\": \"...\"}"));

        let prompt = paraphrase(2, "plan", "Rest and fluids.", FORMAT_VARIANTS[1].1);
        assert!(prompt.starts_with("Return 2 alternative phrasings of the Plan section"));
        assert!(prompt.ends_with(FORMAT_VARIANTS[1].1));
    }
}
